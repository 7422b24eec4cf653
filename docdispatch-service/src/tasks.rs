//! Background task execution.
//!
//! - `context`: the application context handed to every task, and the scope
//!   that marks it active for the duration of one task
//! - `queue`: persistent task queue and its worker pool
//! - `process_document`: the document dispatch task

mod context;
mod process_document;
mod queue;

pub use context::{AppContext, run_in_context};
pub use process_document::{PROCESS_DOCUMENT_TASK, ProcessDocumentArgs, ProcessDocumentTask};
pub use queue::TaskQueue;

use async_trait::async_trait;

use crate::error::ServiceResult;

/// A named unit of background work.
///
/// Arguments arrive as the JSON value stored with the task record; handlers
/// deserialize their own argument type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &AppContext, args: serde_json::Value) -> ServiceResult<()>;
}
