//! Queue configuration.

use std::time::Duration;

/// Configuration for a [`WorkQueue`](crate::queue::WorkQueue).
///
/// Built once before the queue is constructed; the queue never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Prefix for every Redis key of this queue. Must match across all
    /// producers and consumers of the same logical queue.
    pub prefix: String,
    /// Default time after a claim before an unreleased task is considered
    /// stale, when `enqueue` does not specify one.
    pub task_timeout: Duration,
    /// Default interval between sweeps for the background sweeper.
    pub sweep_interval: Duration,
    /// Default time-to-live of a task state hash after a release with
    /// result.
    pub result_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "relque".to_string(),
            task_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            result_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with the given key prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Sets the default task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Sets the default sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the default result time-to-live.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }
}
