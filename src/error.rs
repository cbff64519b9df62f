//! Error types for queue operations.
//!
//! All fallible operations in this crate return [`QueueError`]. The variants
//! map to distinct failure classes:
//!
//! - Redis connectivity and protocol failures are surfaced unchanged
//! - `Timeout` means a bounded wait expired without any side effect
//! - `TaskNotFound` means the queried task state hash does not exist
//! - `NotificationsNotConfigured` means the server cannot support `watch`

use std::time::Duration;

use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to establish the initial Redis connection.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload or result (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No state hash exists for the task.
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    /// A bounded wait expired with no side effect.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The server is not configured to emit the keyspace notifications
    /// that `watch` relies on.
    #[error("Redis notify-keyspace-events must include 'KA' or 'Kgh', got {0:?}")]
    NotificationsNotConfigured(String),

    /// A released task must carry a terminal status.
    #[error("Status '{0}' is not terminal")]
    NonTerminalStatus(TaskStatus),

    /// A task state hash holds a field this client cannot parse.
    #[error("Malformed task state field '{field}': {message}")]
    MalformedState {
        field: &'static str,
        message: String,
    },

    /// The background sweep task panicked or was aborted externally.
    #[error("Sweep loop aborted: {0}")]
    SweepAborted(String),
}
