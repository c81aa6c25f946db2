// registry.rs
//
// Active task registry: task id -> cancellation handle for the supervising
// loop. Owned by the coordinator and passed by handle, not a process-wide
// global. Each entry is written by exactly one supervising task; stop
// requests only read it.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct ActiveTask {
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, ActiveTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live task and hand back its cancellation token.
    pub fn register(&self, task_id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.tasks.insert(
            task_id.to_string(),
            ActiveTask {
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Remove a task. Called as soon as its output stream ends, so a late
    /// stop request correctly reports not-found.
    pub fn remove(&self, task_id: &str) {
        self.tasks.remove(task_id);
    }

    /// Signal the task's cancellation token. Returns false when no live
    /// task is registered under this id.
    pub fn request_stop(&self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_unregistered_task_reports_not_found() {
        let registry = TaskRegistry::new();
        assert!(!registry.request_stop("missing"));
    }

    #[test]
    fn test_register_stop_remove_cycle() {
        let registry = TaskRegistry::new();
        let cancel = registry.register("t1");
        assert!(registry.is_active("t1"));
        assert!(!cancel.is_cancelled());

        assert!(registry.request_stop("t1"));
        assert!(cancel.is_cancelled());

        registry.remove("t1");
        assert!(!registry.is_active("t1"));
        assert!(!registry.request_stop("t1"), "stop after exit is not-found");
    }
}
