//! Background task record operations.
//!
//! The `tasks` table is the persistence layer of the task queue: enqueue
//! inserts a pending row, workers claim rows one at a time and record the
//! outcome when the handler returns.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{TaskRecord, TaskStatus, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

const TASK_COLUMNS: &str = "id, name, args, status, error, created_at, started_at, finished_at";

impl Database {
    /// Insert a new task record
    pub fn insert_task(&self, task: &TaskRecord) -> ServiceResult<()> {
        let conn = self.conn()?;

        let args_json = serde_json::to_string(&task.args).map_err(DatabaseError::Serialization)?;

        conn.execute(
            "INSERT INTO tasks (id, name, args, status, error, created_at, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.id,
                task.name,
                args_json,
                task.status.as_str(),
                task.error,
                format_timestamp(&task.created_at),
                task.started_at.as_ref().map(format_timestamp),
                task.finished_at.as_ref().map(format_timestamp),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> ServiceResult<Option<TaskRecord>> {
        let conn = self.conn()?;

        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRecord::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(task)
    }

    /// Claim the oldest pending task, moving it to `running`.
    ///
    /// Select and update happen under the connection lock, so two workers
    /// never claim the same row.
    pub fn claim_next_pending_task(&self) -> ServiceResult<Option<TaskRecord>> {
        let conn = self.conn()?;

        let task = conn
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' \
                     ORDER BY created_at ASC, rowid ASC LIMIT 1"
                ),
                [],
                TaskRecord::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let Some(mut task) = task else {
            return Ok(None);
        };

        let started_at = Utc::now();
        conn.execute(
            "UPDATE tasks SET status = 'running', started_at = ?1 WHERE id = ?2",
            params![format_timestamp(&started_at), task.id],
        )
        .map_err(DatabaseError::Query)?;

        task.status = TaskStatus::Running;
        task.started_at = Some(started_at);
        Ok(Some(task))
    }

    /// Record the final status of a task
    pub fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> ServiceResult<bool> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE tasks SET status = ?1, error = ?2, finished_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, format_timestamp(&Utc::now()), id],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Fail tasks left `running` by a process that exited mid-task.
    /// Returns the number of tasks marked failed.
    pub fn fail_interrupted_tasks(&self) -> ServiceResult<usize> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                "UPDATE tasks SET status = 'failed', error = 'interrupted by shutdown', finished_at = ?1 \
                 WHERE status = 'running'",
                params![format_timestamp(&Utc::now())],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows)
    }

    /// Count tasks in the given status
    pub fn count_tasks(&self, status: TaskStatus) -> ServiceResult<usize> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;

        Ok(count as usize)
    }
}
