//! Application service behind the HTTP API.

use chrono::Utc;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{Database, Document, TaskRecord};
use crate::error::{ServiceError, ServiceResult, StorageError, format_error_chain};
use crate::extensions::Extensions;
use crate::files::LocalFileStore;
use crate::tasks::{AppContext, PROCESS_DOCUMENT_TASK, ProcessDocumentArgs, TaskQueue};

/// A stored document together with the task that will dispatch it
#[derive(Debug, Serialize)]
pub struct QueuedDocument {
    pub document: Document,
    pub task: TaskRecord,
}

/// Runtime state reported by the health endpoint
#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub queue: String,
    pub active_task_scopes: usize,
    pub pending_tasks: usize,
    pub unrecorded_outcomes: usize,
}

/// Main service coordinator
pub struct DispatchService {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub files: Arc<LocalFileStore>,
    pub context: Arc<AppContext>,
    pub extensions: Arc<Extensions>,
}

impl DispatchService {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        files: Arc<LocalFileStore>,
        context: Arc<AppContext>,
        extensions: Arc<Extensions>,
    ) -> Self {
        Self {
            config,
            db,
            files,
            context,
            extensions,
        }
    }

    fn queue(&self) -> ServiceResult<Arc<TaskQueue>> {
        self.extensions
            .task_queue()
            .ok_or_else(|| ServiceError::Internal {
                message: "task queue is not registered".to_string(),
            })
    }

    /// Store an uploaded file, record the document and queue its dispatch
    pub async fn upload_document(
        &self,
        content: &[u8],
        filename: &str,
        user_id: &str,
    ) -> ServiceResult<QueuedDocument> {
        let max_size = self.config.limits.max_document_size_bytes;
        if content.len() as u64 > max_size {
            return Err(StorageError::FileTooLarge {
                size: content.len() as u64,
                max: max_size,
            }
            .into());
        }

        let doc_id = Uuid::new_v4().to_string();
        self.files.save(&doc_id, content).await?;

        let document = Document {
            id: doc_id,
            name: filename.to_string(),
            user_id: user_id.to_string(),
            file_extension: file_extension_of(filename),
            size_bytes: content.len() as u64,
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.insert_document(&document) {
            if let Err(cleanup) = self.files.remove(&document.id).await {
                warn!(
                    doc_id = %document.id,
                    error = %format_error_chain(&cleanup),
                    "Failed to remove stored file of unrecorded document"
                );
            }
            return Err(e);
        }

        let task = self.enqueue_dispatch(&document).inspect_err(|e| {
            error!(
                doc_id = %document.id,
                error = %format_error_chain(e),
                "Document stored but its dispatch could not be queued"
            );
        })?;
        metrics::counter!("docdispatch_uploads_total").increment(1);

        info!(
            doc_id = %document.id,
            name = %document.name,
            extension = %document.file_extension,
            task_id = %task.id,
            "Document uploaded and queued for dispatch"
        );

        Ok(QueuedDocument { document, task })
    }

    /// Queue another dispatch of an existing document
    pub fn process_document(&self, document_id: &str) -> ServiceResult<QueuedDocument> {
        let document = self.get_document(document_id)?;
        let task = self.enqueue_dispatch(&document)?;
        info!(doc_id = %document.id, task_id = %task.id, "Document queued for reprocessing");
        Ok(QueuedDocument { document, task })
    }

    fn enqueue_dispatch(&self, document: &Document) -> ServiceResult<TaskRecord> {
        self.queue()?.enqueue_with(
            PROCESS_DOCUMENT_TASK,
            &ProcessDocumentArgs {
                document_id: document.id.clone(),
                file_extension: document.file_extension.clone(),
            },
        )
    }

    pub fn get_document(&self, document_id: &str) -> ServiceResult<Document> {
        self.db
            .get_document(document_id)?
            .ok_or_else(|| ServiceError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    pub fn list_documents(&self, user_id: Option<&str>) -> ServiceResult<Vec<Document>> {
        self.db.list_documents(user_id)
    }

    /// Document metadata and the stored file content
    pub async fn download_document(&self, document_id: &str) -> ServiceResult<(Document, Vec<u8>)> {
        let document = self.get_document(document_id)?;
        let content = self.files.read(&document.id).await?;
        Ok((document, content))
    }

    pub fn get_task(&self, task_id: &str) -> ServiceResult<TaskRecord> {
        self.queue()?.get_task(task_id)
    }

    pub fn queue_health(&self) -> ServiceResult<QueueHealth> {
        let queue = self.queue()?;
        Ok(QueueHealth {
            queue: queue.name().to_string(),
            active_task_scopes: self.context.active_scopes(),
            pending_tasks: queue.pending_count()?,
            unrecorded_outcomes: queue.unrecorded_count()?,
        })
    }
}

/// Lowercased final suffix of a filename, empty when it has none
pub fn file_extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
