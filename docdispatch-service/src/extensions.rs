//! Application-scoped registry of named shared resources.
//!
//! Entries are written once during startup and only read afterwards.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::tasks::TaskQueue;

/// Registry key of the configured task queue
pub const TASK_QUEUE_EXTENSION: &str = "task_queue";

#[derive(Default)]
pub struct Extensions {
    entries: DashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a resource under `name`. A name can only be written once.
    pub fn register<T: Any + Send + Sync>(
        &self,
        name: &'static str,
        value: Arc<T>,
    ) -> ServiceResult<()> {
        match self.entries.entry(name) {
            Entry::Occupied(_) => Err(ServiceError::Internal {
                message: format!("extension {name:?} is already registered"),
            }),
            Entry::Vacant(slot) => {
                slot.insert(value);
                debug!(extension = name, "Extension registered");
                Ok(())
            }
        }
    }

    /// Fetch a resource by name, `None` if absent or of another type
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entry = self.entries.get(name)?;
        Arc::clone(entry.value()).downcast::<T>().ok()
    }

    pub fn task_queue(&self) -> Option<Arc<TaskQueue>> {
        self.get(TASK_QUEUE_EXTENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;

    #[test]
    fn test_register_and_get() {
        let extensions = Extensions::new();
        extensions.register("answer", Arc::new(42u32)).unwrap();

        assert_eq!(extensions.get::<u32>("answer").as_deref(), Some(&42));
        assert!(extensions.get::<String>("answer").is_none());
        assert!(extensions.get::<u32>("missing").is_none());
    }

    #[test]
    fn test_second_write_is_rejected() {
        let extensions = Extensions::new();
        extensions.register("answer", Arc::new(1u32)).unwrap();

        let result = extensions.register("answer", Arc::new(2u32));

        assert!(matches!(result, Err(ServiceError::Internal { .. })));
        assert_eq!(extensions.get::<u32>("answer").as_deref(), Some(&1));
    }

    #[test]
    fn test_task_queue_lookup() {
        let extensions = Extensions::new();
        assert!(extensions.task_queue().is_none());

        let db = Arc::new(Database::open_in_memory().unwrap());
        let queue = Arc::new(TaskQueue::new(AppConfig::default().task_queue, db));
        extensions
            .register(TASK_QUEUE_EXTENSION, queue.clone())
            .unwrap();

        let found = extensions.task_queue().unwrap();
        assert!(Arc::ptr_eq(&found, &queue));
        assert_eq!(found.name(), "docdispatch");
    }
}
