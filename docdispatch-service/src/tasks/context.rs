//! Application context for background tasks.
//!
//! Every task receives the same explicit `AppContext` handle; nothing is
//! looked up through process globals. A `TaskScope` marks the context as in
//! use by one task and is released when dropped, including when the task
//! fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, info_span};

use super::TaskHandler;
use crate::capabilities::Capabilities;
use crate::config::AppConfig;
use crate::db::TaskRecord;
use crate::error::ServiceResult;

/// Shared configuration and resource handles available to every task
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub capabilities: Capabilities,
    active_scopes: AtomicUsize,
}

impl AppContext {
    pub fn new(config: Arc<AppConfig>, capabilities: Capabilities) -> Self {
        Self {
            config,
            capabilities,
            active_scopes: AtomicUsize::new(0),
        }
    }

    /// Enter the context for one task execution
    pub fn enter(&self, task_id: &str) -> TaskScope<'_> {
        self.active_scopes.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %task_id, "Task context entered");
        TaskScope {
            ctx: self,
            task_id: task_id.to_string(),
            started_at: Instant::now(),
        }
    }

    /// Number of task scopes currently open
    pub fn active_scopes(&self) -> usize {
        self.active_scopes.load(Ordering::SeqCst)
    }
}

/// An open task scope; dropping it releases the context
pub struct TaskScope<'a> {
    ctx: &'a AppContext,
    task_id: String,
    started_at: Instant,
}

impl TaskScope<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for TaskScope<'_> {
    fn drop(&mut self) {
        self.ctx.active_scopes.fetch_sub(1, Ordering::SeqCst);
        debug!(
            task_id = %self.task_id,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Task context released"
        );
    }
}

/// Run a task handler inside the application context.
///
/// The scope stays open for the whole handler future and closes on every
/// exit path. Handler errors are returned unchanged.
pub async fn run_in_context(
    ctx: &AppContext,
    handler: &dyn TaskHandler,
    task: &TaskRecord,
) -> ServiceResult<()> {
    let span = info_span!("task", task_id = %task.id, task_name = %task.name);

    async {
        let _scope = ctx.enter(&task.id);
        handler.run(ctx, task.args.clone()).await
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskStatus;
    use crate::error::ServiceError;
    use crate::testing::MockCapabilities;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records how many scopes were open while it ran
    #[derive(Default)]
    struct ObservingHandler {
        fail: bool,
        observed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl TaskHandler for ObservingHandler {
        fn name(&self) -> &'static str {
            "observe"
        }

        async fn run(&self, ctx: &AppContext, _args: serde_json::Value) -> ServiceResult<()> {
            self.observed.lock().unwrap().push(ctx.active_scopes());
            if self.fail {
                return Err(ServiceError::Internal {
                    message: "handler failed".to_string(),
                });
            }
            Ok(())
        }
    }

    fn task() -> TaskRecord {
        TaskRecord {
            id: "task-1".to_string(),
            name: "observe".to_string(),
            args: serde_json::Value::Null,
            status: TaskStatus::Running,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_scope_open_during_run_and_released_after() {
        let ctx = MockCapabilities::new().context();
        let handler = ObservingHandler::default();

        run_in_context(&ctx, &handler, &task()).await.unwrap();

        assert_eq!(*handler.observed.lock().unwrap(), vec![1]);
        assert_eq!(ctx.active_scopes(), 0);
    }

    #[tokio::test]
    async fn test_scope_released_when_handler_fails() {
        let ctx = MockCapabilities::new().context();
        let handler = ObservingHandler {
            fail: true,
            ..Default::default()
        };

        let result = run_in_context(&ctx, &handler, &task()).await;

        assert!(matches!(result, Err(ServiceError::Internal { .. })));
        assert_eq!(*handler.observed.lock().unwrap(), vec![1]);
        assert_eq!(ctx.active_scopes(), 0);
    }

    #[test]
    fn test_nested_scopes_are_counted() {
        let ctx = MockCapabilities::new().context();
        let outer = ctx.enter("a");
        {
            let _inner = ctx.enter("b");
            assert_eq!(ctx.active_scopes(), 2);
        }
        assert_eq!(ctx.active_scopes(), 1);
        drop(outer);
        assert_eq!(ctx.active_scopes(), 0);
    }
}
