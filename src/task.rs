//! Task identifiers, statuses, and state snapshots.
//!
//! A task is represented in Redis by an opaque payload blob plus a state
//! hash holding its status, counters, and timestamps. This module defines
//! the Rust-side view of that hash and the helpers that parse it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Field names of the per-task state hash.
pub(crate) mod field {
    pub const STATUS: &str = "status";
    pub const TIMEOUT: &str = "timeout";
    pub const ENQUEUE_TIME: &str = "enqueue_time";
    pub const LAST_DEQUEUE_TIME: &str = "last_dequeue_time";
    pub const DEQUEUE_COUNT: &str = "dequeue_count";
    pub const LAST_REQUEUE_TIME: &str = "last_requeue_time";
    pub const REQUEUE_COUNT: &str = "requeue_count";
    pub const RELEASE_TIME: &str = "release_time";
    pub const RESULT: &str = "result";
}

/// Unique task identifier, assigned at enqueue time.
///
/// Rendered as 32 lowercase hex characters everywhere it appears in Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a task within the queue.
///
/// `Completed` and `Rejected` are terminal: a task never leaves either.
/// The discriminants are the integer values stored in the state hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting in the pending list for a worker.
    Pending,
    /// Claimed by a worker, awaiting release.
    Working,
    /// Scheduled for a future ready time.
    Delayed,
    /// Released after successful completion.
    Completed,
    /// Released after (possibly repeated) failure.
    Rejected,
}

impl TaskStatus {
    /// Tells whether the status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Rejected)
    }

    /// Integer value stored in Redis.
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Working => 1,
            TaskStatus::Delayed => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Rejected => 4,
        }
    }

    /// Parses the integer value stored in Redis.
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Working),
            2 => Some(TaskStatus::Delayed),
            3 => Some(TaskStatus::Completed),
            4 => Some(TaskStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Working => write!(f, "working"),
            TaskStatus::Delayed => write!(f, "delayed"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Point-in-time snapshot of a task's state hash.
///
/// The result, when present, is the raw serialized blob; decode it with
/// [`WorkQueue::decode_result`](crate::queue::WorkQueue::decode_result).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    /// Current status.
    pub status: TaskStatus,
    /// Visibility timeout applied when the task is claimed.
    pub timeout: Duration,
    /// When the task was enqueued.
    pub enqueue_time: DateTime<Utc>,
    /// When the task was last claimed, if ever.
    pub last_dequeue_time: Option<DateTime<Utc>>,
    /// How many times the task has been claimed.
    pub dequeue_count: u32,
    /// When the task was last returned to pending or delayed, if ever.
    pub last_requeue_time: Option<DateTime<Utc>>,
    /// How many times the task has been returned to pending or delayed.
    pub requeue_count: u32,
    /// When the task was released, if it carried a result.
    pub release_time: Option<DateTime<Utc>>,
    /// Raw serialized result blob, present only after a release with result.
    pub result: Option<Vec<u8>>,
}

impl TaskState {
    /// Parses a snapshot from an HGETALL reply.
    ///
    /// The caller must have verified the hash is non-empty; an empty reply
    /// means the task does not exist and maps to `TaskNotFound` upstream.
    pub(crate) fn from_hash(hash: &HashMap<String, Vec<u8>>) -> Result<Self, QueueError> {
        let status_raw = parse_u8(hash, field::STATUS)?
            .ok_or_else(|| malformed(field::STATUS, "missing"))?;
        let status = TaskStatus::from_u8(status_raw)
            .ok_or_else(|| malformed(field::STATUS, format!("unknown value {status_raw}")))?;

        let timeout = parse_f64(hash, field::TIMEOUT)?
            .ok_or_else(|| malformed(field::TIMEOUT, "missing"))?;
        let enqueue_time = parse_f64(hash, field::ENQUEUE_TIME)?
            .ok_or_else(|| malformed(field::ENQUEUE_TIME, "missing"))?;

        // The hash is shared mutable state; a foreign writer can plant a
        // negative, NaN, or overflowing timeout there.
        let timeout = Duration::try_from_secs_f64(timeout)
            .map_err(|e| malformed(field::TIMEOUT, e.to_string()))?;

        Ok(Self {
            status,
            timeout,
            enqueue_time: timestamp(field::ENQUEUE_TIME, enqueue_time)?,
            last_dequeue_time: parse_f64(hash, field::LAST_DEQUEUE_TIME)?
                .map(|ts| timestamp(field::LAST_DEQUEUE_TIME, ts))
                .transpose()?,
            dequeue_count: parse_u32(hash, field::DEQUEUE_COUNT)?.unwrap_or(0),
            last_requeue_time: parse_f64(hash, field::LAST_REQUEUE_TIME)?
                .map(|ts| timestamp(field::LAST_REQUEUE_TIME, ts))
                .transpose()?,
            requeue_count: parse_u32(hash, field::REQUEUE_COUNT)?.unwrap_or(0),
            release_time: parse_f64(hash, field::RELEASE_TIME)?
                .map(|ts| timestamp(field::RELEASE_TIME, ts))
                .transpose()?,
            result: hash.get(field::RESULT).cloned(),
        })
    }
}

/// Current time as fractional unix seconds, the score unit used in Redis.
pub(crate) fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

fn timestamp(name: &'static str, ts: f64) -> Result<DateTime<Utc>, QueueError> {
    DateTime::from_timestamp_micros((ts * 1e6).round() as i64)
        .ok_or_else(|| malformed(name, format!("timestamp {ts} out of range")))
}

fn malformed(field: &'static str, message: impl Into<String>) -> QueueError {
    QueueError::MalformedState {
        field,
        message: message.into(),
    }
}

fn parse_text<'a>(
    hash: &'a HashMap<String, Vec<u8>>,
    name: &'static str,
) -> Result<Option<&'a str>, QueueError> {
    hash.get(name)
        .map(|bytes| {
            std::str::from_utf8(bytes).map_err(|e| malformed(name, format!("not UTF-8: {e}")))
        })
        .transpose()
}

fn parse_f64(hash: &HashMap<String, Vec<u8>>, name: &'static str) -> Result<Option<f64>, QueueError> {
    parse_text(hash, name)?
        .map(|text| text.parse().map_err(|e| malformed(name, format!("{e}"))))
        .transpose()
}

fn parse_u32(hash: &HashMap<String, Vec<u8>>, name: &'static str) -> Result<Option<u32>, QueueError> {
    parse_text(hash, name)?
        .map(|text| text.parse().map_err(|e| malformed(name, format!("{e}"))))
        .transpose()
}

fn parse_u8(hash: &HashMap<String, Vec<u8>>, name: &'static str) -> Result<Option<u8>, QueueError> {
    parse_text(hash, name)?
        .map(|text| text.parse().map_err(|e| malformed(name, format!("{e}"))))
        .transpose()
}
