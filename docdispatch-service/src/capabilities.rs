//! Capabilities the dispatcher delegates to.
//!
//! Each processing lane ends in exactly one of these calls. The traits keep
//! the dispatcher independent of where the work actually happens; the
//! default wiring uses the SQLite database for lookup, the local file store
//! for materialization and download URLs, and [`HttpCapabilityClient`] for
//! the three processing services.

mod http;

pub use http::HttpCapabilityClient;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::db::{Database, Document};
use crate::error::{ServiceError, ServiceResult};
use crate::files::MaterializedFile;

/// Resolves a document identifier to its record
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// Fails with [`ServiceError::DocumentNotFound`] when the id does not resolve.
    async fn find_document(&self, document_id: &str) -> ServiceResult<Document>;
}

/// Produces a local copy of a document's content that lives as long as the
/// returned handle
#[async_trait]
pub trait FileMaterializer: Send + Sync {
    async fn materialize(&self, document_id: &str) -> ServiceResult<MaterializedFile>;
}

/// Issues URLs from which a downstream service can fetch a document
#[async_trait]
pub trait DownloadUrlIssuer: Send + Sync {
    async fn create_download_urls(&self, document_id: &str) -> ServiceResult<Vec<String>>;
}

/// Generates and persists embeddings for text documents
#[async_trait]
pub trait EmbeddingCapability: Send + Sync {
    async fn create_embeddings(
        &self,
        document_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()>;
}

/// Ingests spreadsheet files
#[async_trait]
pub trait SpreadsheetCapability: Send + Sync {
    async fn handle_spreadsheet(
        &self,
        document_name: &str,
        user_id: &str,
        file_path: &Path,
        file_extension: &str,
    ) -> ServiceResult<()>;
}

/// Analyzes audio recordings and writes a text artifact
#[async_trait]
pub trait AudioAnalysisCapability: Send + Sync {
    async fn analyze_audio(
        &self,
        download_url: &str,
        output_path: &str,
        document_id: &str,
    ) -> ServiceResult<()>;
}

/// The full set of collaborators a dispatch needs
#[derive(Clone)]
pub struct Capabilities {
    pub documents: Arc<dyn DocumentLookup>,
    pub files: Arc<dyn FileMaterializer>,
    pub download_urls: Arc<dyn DownloadUrlIssuer>,
    pub embeddings: Arc<dyn EmbeddingCapability>,
    pub spreadsheets: Arc<dyn SpreadsheetCapability>,
    pub audio: Arc<dyn AudioAnalysisCapability>,
}

#[async_trait]
impl DocumentLookup for Database {
    async fn find_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }
}
