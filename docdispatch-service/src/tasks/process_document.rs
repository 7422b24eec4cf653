//! The `process_document` task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AppContext, TaskHandler};
use crate::dispatch::dispatch_document;
use crate::error::{ServiceError, ServiceResult};

pub const PROCESS_DOCUMENT_TASK: &str = "process_document";

/// Arguments of the `process_document` task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDocumentArgs {
    pub document_id: String,
    pub file_extension: String,
}

/// Routes one uploaded document to its processing lane
pub struct ProcessDocumentTask;

#[async_trait]
impl TaskHandler for ProcessDocumentTask {
    fn name(&self) -> &'static str {
        PROCESS_DOCUMENT_TASK
    }

    async fn run(&self, ctx: &AppContext, args: serde_json::Value) -> ServiceResult<()> {
        let args: ProcessDocumentArgs =
            serde_json::from_value(args).map_err(|source| ServiceError::InvalidTaskArgs {
                task: PROCESS_DOCUMENT_TASK.to_string(),
                source,
            })?;

        dispatch_document(ctx, &args.document_id, &args.file_extension).await
    }
}
