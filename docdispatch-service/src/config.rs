use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

/// Application configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_task_queue")]
    pub task_queue: TaskQueueConfig,

    #[serde(default)]
    pub downstream: DownstreamConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used when issuing document download URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docdispatch.db")
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }
}

/// Background task queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TaskQueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Number of concurrent workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between polls when the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay after a failed queue read
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl TaskQueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Endpoints of the downstream processing services.
/// An unset endpoint fails the matching capability when it is invoked.
#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    #[serde(default)]
    pub embeddings_url: Option<String>,

    #[serde(default)]
    pub spreadsheets_url: Option<String>,

    #[serde(default)]
    pub audio_url: Option<String>,

    #[serde(default = "default_downstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            embeddings_url: None,
            spreadsheets_url: None,
            audio_url: None,
            timeout_secs: default_downstream_timeout_secs(),
        }
    }
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Size limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            task_queue: default_task_queue(),
            downstream: DownstreamConfig::default(),
            limits: default_limits(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional `config` file and `DOCDISPATCH__*` env vars
    pub fn load() -> ServiceResult<Self> {
        Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("DOCDISPATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        public_base_url: default_public_base_url(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_task_queue() -> TaskQueueConfig {
    TaskQueueConfig {
        name: default_queue_name(),
        concurrency: default_concurrency(),
        poll_interval_ms: default_poll_interval_ms(),
        error_backoff_ms: default_error_backoff_ms(),
    }
}

fn default_queue_name() -> String {
    "docdispatch".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_error_backoff_ms() -> u64 {
    5000
}

fn default_downstream_timeout_secs() -> u64 {
    120
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
    }
}

fn default_max_document_size() -> u64 {
    104_857_600 // 100MB
}
