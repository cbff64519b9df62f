//! relque: Asynchronous Redis-backed reliable work queue.
//!
//! This library layers a client-side protocol over a shared Redis instance
//! to give many independent producer and consumer processes at-least-once
//! task delivery, visibility timeouts, delayed scheduling, and live status
//! observation. There is no server-side component beyond Redis itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use relque::{QueueConfig, WorkQueue};
//!
//! let queue = WorkQueue::connect("redis://localhost:6379", QueueConfig::new("emails")).await?;
//!
//! let task_id = queue.enqueue(&serde_json::json!({"to": "a@example.org"})).await?;
//!
//! let (claimed_id, payload): (_, serde_json::Value) =
//!     queue.dequeue(Some(Duration::from_secs(5))).await?;
//! // ... process the payload ...
//! queue.release_with(claimed_id, &"sent", Default::default()).await?;
//! ```

pub mod config;
pub mod error;
pub mod keys;
pub mod queue;
mod scripts;
pub mod serialize;
pub mod sweeper;
pub mod task;
mod watch;

pub use config::QueueConfig;
pub use error::QueueError;
pub use keys::QueueKeys;
pub use queue::{EnqueueOptions, QueueStats, ReleaseOptions, WorkQueue};
pub use serialize::{JsonSerializer, Serializer};
pub use sweeper::SweeperHandle;
pub use task::{TaskId, TaskState, TaskStatus};
