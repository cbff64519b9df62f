//! Redis key names derived from the queue prefix.
//!
//! All key names are computed once at queue construction and never change;
//! every other module addresses Redis exclusively through this map.

use crate::task::TaskId;

/// The set of Redis keys backing one logical queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// List of task ids awaiting a worker (FIFO).
    pub pending: String,
    /// Sorted set of claimed task ids, scored by stale deadline.
    pub working: String,
    /// Sorted set of delayed task ids, scored by ready time.
    pub delayed: String,
    /// Hash of task id to raw payload blob.
    pub payloads: String,
    /// Prefix of the per-task state hash keys.
    task_prefix: String,
}

impl QueueKeys {
    /// Derives the key set for a queue prefix.
    pub fn new(prefix: &str) -> Self {
        Self {
            pending: format!("{prefix}:pending"),
            working: format!("{prefix}:working"),
            delayed: format!("{prefix}:delayed"),
            payloads: format!("{prefix}:tasks"),
            task_prefix: format!("{prefix}:task"),
        }
    }

    /// Key of the state hash for one task.
    pub fn task_state(&self, task_id: TaskId) -> String {
        format!("{}:{}", self.task_prefix, task_id)
    }

    /// Prefix shared by all per-task state hash keys.
    pub fn task_prefix(&self) -> &str {
        &self.task_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_carry_prefix() {
        let keys = QueueKeys::new("orders");

        assert_eq!(keys.pending, "orders:pending");
        assert_eq!(keys.working, "orders:working");
        assert_eq!(keys.delayed, "orders:delayed");
        assert_eq!(keys.payloads, "orders:tasks");
        assert_eq!(keys.task_prefix(), "orders:task");
    }

    #[test]
    fn test_task_state_key() {
        let keys = QueueKeys::new("orders");
        let id = TaskId::new();

        assert_eq!(keys.task_state(id), format!("orders:task:{id}"));
    }
}
