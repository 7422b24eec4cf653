//! Recording mock capabilities for tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::capabilities::{
    AudioAnalysisCapability, Capabilities, DocumentLookup, DownloadUrlIssuer,
    EmbeddingCapability, FileMaterializer, SpreadsheetCapability,
};
use crate::config::AppConfig;
use crate::db::Document;
use crate::error::{CapabilityError, ServiceError, ServiceResult, StorageError};
use crate::files::MaterializedFile;
use crate::tasks::AppContext;

/// One observed capability call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindDocument(String),
    Materialize(String),
    DownloadUrls(String),
    Embeddings {
        document_id: String,
        file_path: PathBuf,
        file_extension: String,
    },
    Spreadsheet {
        document_name: String,
        user_id: String,
        file_path: PathBuf,
        file_extension: String,
    },
    Audio {
        download_url: String,
        output_path: String,
        document_id: String,
    },
}

impl Call {
    fn is_processing(&self) -> bool {
        matches!(
            self,
            Call::Embeddings { .. } | Call::Spreadsheet { .. } | Call::Audio { .. }
        )
    }
}

#[derive(Default)]
struct MockState {
    documents: Mutex<HashMap<String, Document>>,
    download_urls: Mutex<Option<Vec<String>>>,
    failing_downstream: Mutex<bool>,
    calls: Mutex<Vec<Call>>,
    materialized: Mutex<Vec<PathBuf>>,
}

/// Implements every capability, records each call in order
#[derive(Clone, Default)]
pub struct MockCapabilities {
    state: Arc<MockState>,
}

impl MockCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: &str, name: &str, user_id: &str) -> Self {
        let file_extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        self.state.documents.lock().unwrap().insert(
            id.to_string(),
            Document {
                id: id.to_string(),
                name: name.to_string(),
                user_id: user_id.to_string(),
                file_extension,
                size_bytes: 0,
                created_at: Utc::now(),
            },
        );
        self
    }

    pub fn with_download_urls(self, urls: &[&str]) -> Self {
        *self.state.download_urls.lock().unwrap() =
            Some(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Make the three processing capabilities fail
    pub fn with_failing_downstream(self) -> Self {
        *self.state.failing_downstream.lock().unwrap() = true;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        let shared = Arc::new(self.clone());
        Capabilities {
            documents: shared.clone(),
            files: shared.clone(),
            download_urls: shared.clone(),
            embeddings: shared.clone(),
            spreadsheets: shared.clone(),
            audio: shared,
        }
    }

    pub fn context(&self) -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(AppConfig::default()),
            self.capabilities(),
        ))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn processing_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_processing)
            .collect()
    }

    /// Paths of every temporary file handed out
    pub fn materialized_paths(&self) -> Vec<PathBuf> {
        self.state.materialized.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.state.calls.lock().unwrap().push(call);
    }

    fn downstream_result(&self, capability: &'static str) -> ServiceResult<()> {
        if *self.state.failing_downstream.lock().unwrap() {
            return Err(CapabilityError::Rejected {
                capability,
                status: 500,
                message: "mock failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentLookup for MockCapabilities {
    async fn find_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.record(Call::FindDocument(document_id.to_string()));
        self.state
            .documents
            .lock()
            .unwrap()
            .get(document_id)
            .cloned()
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }
}

#[async_trait]
impl FileMaterializer for MockCapabilities {
    async fn materialize(&self, document_id: &str) -> ServiceResult<MaterializedFile> {
        self.record(Call::Materialize(document_id.to_string()));
        let mut file = tempfile::NamedTempFile::new().map_err(StorageError::Io)?;
        file.write_all(document_id.as_bytes())
            .map_err(StorageError::Io)?;
        self.state
            .materialized
            .lock()
            .unwrap()
            .push(file.path().to_path_buf());
        Ok(MaterializedFile::new(file))
    }
}

#[async_trait]
impl DownloadUrlIssuer for MockCapabilities {
    async fn create_download_urls(&self, document_id: &str) -> ServiceResult<Vec<String>> {
        self.record(Call::DownloadUrls(document_id.to_string()));
        let configured = self.state.download_urls.lock().unwrap().clone();
        Ok(configured.unwrap_or_else(|| vec![format!("http://files.test/{document_id}")]))
    }
}

fn assert_live(file_path: &Path) {
    assert!(
        file_path.exists(),
        "capability received a released file: {}",
        file_path.display()
    );
}

#[async_trait]
impl EmbeddingCapability for MockCapabilities {
    async fn create_embeddings(
        &self,
        document_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()> {
        assert_live(file_path);
        self.record(Call::Embeddings {
            document_id: document_id.to_string(),
            file_path: file_path.to_path_buf(),
            file_extension: file_extension.to_string(),
        });
        self.downstream_result("embedding generation")
    }
}

#[async_trait]
impl SpreadsheetCapability for MockCapabilities {
    async fn handle_spreadsheet(
        &self,
        document_name: &str,
        user_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()> {
        assert_live(file_path);
        self.record(Call::Spreadsheet {
            document_name: document_name.to_string(),
            user_id: user_id.to_string(),
            file_path: file_path.to_path_buf(),
            file_extension: file_extension.to_string(),
        });
        self.downstream_result("spreadsheet handling")
    }
}

#[async_trait]
impl AudioAnalysisCapability for MockCapabilities {
    async fn analyze_audio(
        &self,
        download_url: &str,
        output_path: &str,
        document_id: &str,
    ) -> ServiceResult<()> {
        self.record(Call::Audio {
            download_url: download_url.to_string(),
            output_path: output_path.to_string(),
            document_id: document_id.to_string(),
        });
        self.downstream_result("audio analysis")
    }
}
