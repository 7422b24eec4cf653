//! Persistent task queue and worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{AppContext, TaskHandler, run_in_context};
use crate::config::TaskQueueConfig;
use crate::db::{Database, TaskRecord, TaskStatus};
use crate::error::{ServiceError, ServiceResult, format_error_chain};

/// Named background tasks backed by the `tasks` table.
///
/// Handlers are registered before the queue is shared; afterwards the set of
/// task names is fixed and enqueueing an unregistered name is rejected.
pub struct TaskQueue {
    config: TaskQueueConfig,
    db: Arc<Database>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    /// Finished tasks whose outcome could not be written yet
    unrecorded: Mutex<Vec<TaskOutcome>>,
}

#[derive(Debug, Clone)]
struct TaskOutcome {
    task_id: String,
    status: TaskStatus,
    error: Option<String>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig, db: Arc<Database>) -> Self {
        Self {
            config,
            db,
            handlers: HashMap::new(),
            unrecorded: Mutex::new(Vec::new()),
        }
    }

    /// Register a task handler under its name
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let name = handler.name();
        if self.handlers.insert(name, handler).is_some() {
            warn!(task = name, "Task handler replaced");
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Persist a pending task
    pub fn enqueue(&self, name: &str, args: serde_json::Value) -> ServiceResult<TaskRecord> {
        if !self.handlers.contains_key(name) {
            return Err(ServiceError::UnknownTask {
                name: name.to_string(),
            });
        }

        let task = TaskRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            args,
            status: TaskStatus::Pending,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.db.insert_task(&task)?;

        info!(queue = %self.config.name, task_id = %task.id, task = %task.name, "Task enqueued");
        Ok(task)
    }

    /// Serialize typed arguments and enqueue
    pub fn enqueue_with<A: Serialize>(&self, name: &str, args: &A) -> ServiceResult<TaskRecord> {
        let args = serde_json::to_value(args).map_err(|source| ServiceError::InvalidTaskArgs {
            task: name.to_string(),
            source,
        })?;
        self.enqueue(name, args)
    }

    pub fn get_task(&self, task_id: &str) -> ServiceResult<TaskRecord> {
        self.db
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    pub fn pending_count(&self) -> ServiceResult<usize> {
        self.db.count_tasks(TaskStatus::Pending)
    }

    /// Claim and execute the oldest pending task.
    /// Returns the finished record, or `None` when nothing was pending.
    ///
    /// Outcomes that could not be written earlier are recorded first; while
    /// that fails no new task is claimed.
    pub async fn run_next(&self, ctx: &AppContext) -> ServiceResult<Option<TaskRecord>> {
        self.record_unrecorded()?;

        match self.db.claim_next_pending_task()? {
            Some(task) => self.execute(ctx, task).await.map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, ctx: &AppContext, mut task: TaskRecord) -> ServiceResult<TaskRecord> {
        let started = Instant::now();

        let outcome = match self.handlers.get(task.name.as_str()) {
            Some(handler) => run_in_context(ctx, handler.as_ref(), &task).await,
            None => Err(ServiceError::UnknownTask {
                name: task.name.clone(),
            }),
        };

        let elapsed = started.elapsed();
        let (status, error_message) = match &outcome {
            Ok(()) => (TaskStatus::Succeeded, None),
            Err(e) => (TaskStatus::Failed, Some(format_error_chain(e))),
        };

        metrics::counter!(
            "docdispatch_tasks_total",
            "task" => task.name.clone(),
            "outcome" => status.as_str()
        )
        .increment(1);
        metrics::histogram!("docdispatch_task_duration_seconds", "task" => task.name.clone())
            .record(elapsed.as_secs_f64());

        match &error_message {
            None => info!(
                task_id = %task.id,
                task = %task.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task succeeded"
            ),
            Some(message) => error!(
                task_id = %task.id,
                task = %task.name,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %message,
                "Task failed"
            ),
        }

        let outcome = TaskOutcome {
            task_id: task.id.clone(),
            status,
            error: error_message.clone(),
        };
        if let Err(e) = self.record(&outcome) {
            error!(
                task_id = %task.id,
                outcome = status.as_str(),
                task_error = error_message.as_deref().unwrap_or(""),
                error = %format_error_chain(&e),
                "Failed to record task outcome, keeping it for retry"
            );
            self.lock_unrecorded()?.push(outcome);
        }

        task.status = status;
        task.error = error_message;
        task.finished_at = Some(Utc::now());
        Ok(task)
    }

    fn record(&self, outcome: &TaskOutcome) -> ServiceResult<()> {
        self.db
            .finish_task(&outcome.task_id, outcome.status, outcome.error.as_deref())?;
        Ok(())
    }

    fn lock_unrecorded(&self) -> ServiceResult<MutexGuard<'_, Vec<TaskOutcome>>> {
        self.unrecorded.lock().map_err(|_| ServiceError::Internal {
            message: "unrecorded task outcome lock poisoned".to_string(),
        })
    }

    /// Write outcomes kept from earlier failed attempts
    fn record_unrecorded(&self) -> ServiceResult<()> {
        let mut unrecorded = self.lock_unrecorded()?;
        while let Some(outcome) = unrecorded.first() {
            self.record(outcome)?;
            info!(task_id = %outcome.task_id, outcome = outcome.status.as_str(), "Recorded kept task outcome");
            unrecorded.remove(0);
        }
        Ok(())
    }

    /// Number of finished tasks whose outcome is not yet stored
    pub fn unrecorded_count(&self) -> ServiceResult<usize> {
        Ok(self.lock_unrecorded()?.len())
    }

    /// Start `concurrency` workers.
    ///
    /// Workers check the shutdown token between tasks, so a task that has
    /// started always runs to completion.
    pub fn start_workers(
        self: &Arc<Self>,
        ctx: Arc<AppContext>,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let concurrency = self.config.concurrency.max(1);
        info!(queue = %self.config.name, concurrency, "Starting task workers");

        (0..concurrency)
            .map(|worker| {
                let queue = Arc::clone(self);
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { queue.worker_loop(worker, &ctx, &shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, ctx: &AppContext, shutdown: &CancellationToken) {
        info!(queue = %self.config.name, worker, "Task worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.run_next(ctx).await {
                Ok(Some(_)) => None,
                Ok(None) => Some(self.config.poll_interval()),
                Err(e) => {
                    error!(worker, error = %format_error_chain(&e), "Failed to run next task");
                    Some(self.config.error_backoff())
                }
            };

            if let Some(delay) = idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if let Err(e) = self.record_unrecorded() {
            error!(worker, error = %format_error_chain(&e), "Task outcomes left unrecorded at shutdown");
        }

        info!(queue = %self.config.name, worker, "Task worker stopped");
    }
}
