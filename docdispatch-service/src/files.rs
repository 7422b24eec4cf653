//! Local document file storage.
//!
//! Uploaded files live under `<data_dir>/documents/<document id>`. Processing
//! never touches the stored copy directly: each dispatch works on a
//! [`MaterializedFile`], a temporary copy removed when the handle drops.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::capabilities::{DownloadUrlIssuer, FileMaterializer};
use crate::error::{ServiceResult, StorageError};

/// Temporary local copy of a document's content, deleted on drop
#[derive(Debug)]
pub struct MaterializedFile {
    file: NamedTempFile,
}

impl MaterializedFile {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for MaterializedFile {
    fn drop(&mut self) {
        debug!(path = %self.file.path().display(), "Releasing materialized file");
    }
}

/// Stores uploaded documents on the local filesystem
pub struct LocalFileStore {
    documents_dir: PathBuf,
    public_base_url: String,
}

impl LocalFileStore {
    pub fn new(documents_dir: PathBuf, public_base_url: impl Into<String>) -> ServiceResult<Self> {
        std::fs::create_dir_all(&documents_dir).map_err(StorageError::Io)?;
        Ok(Self {
            documents_dir,
            public_base_url: public_base_url.into(),
        })
    }

    fn stored_path(&self, document_id: &str) -> PathBuf {
        self.documents_dir.join(document_id)
    }

    /// Persist an uploaded file for a document
    pub async fn save(&self, document_id: &str, content: &[u8]) -> ServiceResult<PathBuf> {
        let path = self.stored_path(document_id);
        tokio::fs::write(&path, content)
            .await
            .map_err(StorageError::Io)?;
        Ok(path)
    }

    /// Delete a stored document file; a missing file is not an error
    pub async fn remove(&self, document_id: &str) -> ServiceResult<()> {
        match tokio::fs::remove_file(self.stored_path(document_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e).into()),
        }
    }

    /// Read a stored document file
    pub async fn read(&self, document_id: &str) -> ServiceResult<Vec<u8>> {
        let path = self.stored_path(document_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::FileMissing {
                document_id: document_id.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::Io(e).into()),
        }
    }
}

#[async_trait]
impl FileMaterializer for LocalFileStore {
    async fn materialize(&self, document_id: &str) -> ServiceResult<MaterializedFile> {
        let source = self.stored_path(document_id);
        if !tokio::fs::try_exists(&source)
            .await
            .map_err(StorageError::Io)?
        {
            return Err(StorageError::FileMissing {
                document_id: document_id.to_string(),
            }
            .into());
        }

        let temp = tempfile::Builder::new()
            .prefix("docdispatch-")
            .tempfile()
            .map_err(StorageError::Io)?;
        tokio::fs::copy(&source, temp.path())
            .await
            .map_err(StorageError::Io)?;

        debug!(doc_id = %document_id, path = %temp.path().display(), "Materialized document file");
        Ok(MaterializedFile::new(temp))
    }
}

#[async_trait]
impl DownloadUrlIssuer for LocalFileStore {
    async fn create_download_urls(&self, document_id: &str) -> ServiceResult<Vec<String>> {
        Ok(vec![format!(
            "{}/api/documents/{}/download",
            self.public_base_url.trim_end_matches('/'),
            document_id
        )])
    }
}
