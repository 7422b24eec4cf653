//! HTTP client for the downstream processing services.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{AudioAnalysisCapability, EmbeddingCapability, SpreadsheetCapability};
use crate::config::DownstreamConfig;
use crate::error::{CapabilityError, ServiceError, ServiceResult, StorageError};

const EMBEDDINGS: &str = "embedding generation";
const SPREADSHEETS: &str = "spreadsheet handling";
const AUDIO: &str = "audio analysis";

/// Forwards each capability call to its configured HTTP endpoint.
///
/// Embedding and spreadsheet calls upload the materialized file as multipart
/// form data. Audio analysis only sends the download URL, the service fetches
/// the recording itself.
pub struct HttpCapabilityClient {
    client: reqwest::Client,
    config: DownstreamConfig,
}

#[derive(Serialize)]
struct AudioAnalysisRequest<'a> {
    download_url: &'a str,
    output_path: &'a str,
    document_id: &'a str,
}

impl HttpCapabilityClient {
    pub fn new(config: DownstreamConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build downstream HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn endpoint<'a>(
        capability: &'static str,
        url: &'a Option<String>,
    ) -> Result<&'a str, CapabilityError> {
        url.as_deref()
            .ok_or(CapabilityError::NotConfigured { capability })
    }

    /// Multipart part that streams the file from disk
    async fn file_part(file_path: &Path) -> ServiceResult<Part> {
        let file = tokio::fs::File::open(file_path)
            .await
            .map_err(StorageError::Io)?;
        let length = file.metadata().await.map_err(StorageError::Io)?.len();
        let filename = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        Ok(Part::stream_with_length(body, length).file_name(filename))
    }

    async fn send(
        &self,
        capability: &'static str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), CapabilityError> {
        let response = request
            .send()
            .await
            .map_err(|source| CapabilityError::Request {
                capability,
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Rejected {
                capability,
                status: status.as_u16(),
                message,
            });
        }

        debug!(capability, url, status = status.as_u16(), "Downstream call succeeded");
        Ok(())
    }
}

#[async_trait]
impl EmbeddingCapability for HttpCapabilityClient {
    async fn create_embeddings(
        &self,
        document_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()> {
        let url = Self::endpoint(EMBEDDINGS, &self.config.embeddings_url)?;
        let form = Form::new()
            .text("document_id", document_id.to_string())
            .text("file_extension", file_extension.to_string())
            .part("file", Self::file_part(file_path).await?);

        self.send(EMBEDDINGS, url, self.client.post(url).multipart(form))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SpreadsheetCapability for HttpCapabilityClient {
    async fn handle_spreadsheet(
        &self,
        document_name: &str,
        user_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()> {
        let url = Self::endpoint(SPREADSHEETS, &self.config.spreadsheets_url)?;
        let form = Form::new()
            .text("document_name", document_name.to_string())
            .text("user_id", user_id.to_string())
            .text("file_extension", file_extension.to_string())
            .part("file", Self::file_part(file_path).await?);

        self.send(SPREADSHEETS, url, self.client.post(url).multipart(form))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AudioAnalysisCapability for HttpCapabilityClient {
    async fn analyze_audio(
        &self,
        download_url: &str,
        output_path: &str,
        document_id: &str,
    ) -> ServiceResult<()> {
        let url = Self::endpoint(AUDIO, &self.config.audio_url)?;
        let body = AudioAnalysisRequest {
            download_url,
            output_path,
            document_id,
        };

        self.send(AUDIO, url, self.client.post(url).json(&body))
            .await?;
        Ok(())
    }
}
