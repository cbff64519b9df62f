//! Redis-backed reliable work queue.
//!
//! This module provides the central [`WorkQueue`] type, a client-side
//! protocol over a shared Redis instance that gives independent producer
//! and consumer processes:
//!
//! - At-least-once delivery with a crash-safe rotate-then-confirm dequeue
//! - Visibility timeouts on claimed tasks
//! - Delayed scheduling
//! - Atomic multi-key state transitions via Lua scripts and MULTI/EXEC
//!
//! # Queue Structure
//!
//! A queue named by prefix `q` uses five kinds of Redis keys:
//!
//! - `q:pending`: list of task ids awaiting a worker (FIFO)
//! - `q:working`: sorted set of claimed ids, scored by stale deadline
//! - `q:delayed`: sorted set of delayed ids, scored by ready time
//! - `q:tasks`: hash of task id to raw payload blob
//! - `q:task:<id>`: per-task state hash (status, counters, timestamps)
//!
//! # Reliability
//!
//! `dequeue` first rotates the next id to the back of the pending list with
//! BRPOPLPUSH, so a consumer crash between "found a task" and "recorded the
//! claim" never loses the id. The claim itself is confirmed by a Lua script
//! that removes the exact id from the list; among racing consumers exactly
//! one removal succeeds.

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::keys::QueueKeys;
use crate::scripts;
use crate::serialize::{JsonSerializer, Serializer};
use crate::task::{field, now_ts, TaskId, TaskState, TaskStatus};

/// Options for [`WorkQueue::enqueue_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Time after a claim before the unreleased task is considered stale.
    /// Defaults to the queue-wide task timeout.
    pub timeout: Option<Duration>,
    /// Hold the task in the delayed set for this long before it becomes
    /// eligible for pending. Only a sweep promotes it.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Sets the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the scheduling delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Options for [`WorkQueue::release_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// How long the task state hash remains readable after release.
    /// Defaults to the queue-wide result TTL.
    pub result_ttl: Option<Duration>,
    /// Terminal status to record. Non-terminal values are rejected.
    pub status: TaskStatus,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            result_ttl: None,
            status: TaskStatus::Completed,
        }
    }
}

impl ReleaseOptions {
    /// Sets the result TTL.
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Sets the terminal status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Queue counters, read in one atomic pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks whose payload is still stored (all unreleased tasks).
    pub total: u64,
    /// Tasks awaiting a worker.
    pub pending: u64,
    /// Tasks claimed and not yet released.
    pub working: u64,
    /// Tasks not yet eligible for pending.
    pub delayed: u64,
}

/// Reliable work queue over a shared Redis instance.
///
/// Cloning is not provided; share the queue across tasks with `Arc`. All
/// operations take `&self` and are safe to issue concurrently from many
/// tasks and many processes.
pub struct WorkQueue<S: Serializer = JsonSerializer> {
    pub(crate) redis: ConnectionManager,
    pub(crate) client: redis::Client,
    pub(crate) keys: QueueKeys,
    pub(crate) config: QueueConfig,
    pub(crate) serializer: S,
    pub(crate) notifications_verified: AtomicBool,
}

impl WorkQueue<JsonSerializer> {
    /// Connects to Redis and creates a queue with the default JSON
    /// serializer.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g. "redis://localhost:6379")
    /// * `config` - Queue configuration
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, config: QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        Self::from_client(client, config).await
    }

    /// Creates a queue from an existing Redis client.
    ///
    /// Useful when the client is shared with other components.
    pub async fn from_client(
        client: redis::Client,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            redis,
            client,
            keys: QueueKeys::new(&config.prefix),
            config,
            serializer: JsonSerializer,
            notifications_verified: AtomicBool::new(false),
        })
    }
}

impl<S: Serializer> WorkQueue<S> {
    /// Replaces the serializer, e.g. with a compact binary codec.
    ///
    /// Producers and consumers of the same queue must use the same one.
    pub fn with_serializer<S2: Serializer>(self, serializer: S2) -> WorkQueue<S2> {
        WorkQueue {
            redis: self.redis,
            client: self.client,
            keys: self.keys,
            config: self.config,
            serializer,
            notifications_verified: self.notifications_verified,
        }
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns the derived Redis key names.
    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Puts a task on the queue with default options.
    ///
    /// See [`enqueue_with`](Self::enqueue_with).
    pub async fn enqueue<T>(&self, payload: &T) -> Result<TaskId, QueueError>
    where
        T: Serialize + ?Sized,
    {
        self.enqueue_with(payload, EnqueueOptions::default()).await
    }

    /// Puts a task on the queue, optionally with a timeout and a delay.
    ///
    /// The payload is serialized, stored, and the fresh task id is inserted
    /// either at the producing end of the pending list or, when a non-zero
    /// delay is given, into the delayed set scored by its ready time. All
    /// writes execute as one MULTI/EXEC transaction.
    ///
    /// Note that a delayed task only becomes dequeuable once a sweep runs
    /// at or after its ready time.
    ///
    /// # Errors
    ///
    /// Serialization failures and Redis errors are returned unchanged.
    pub async fn enqueue_with<T>(
        &self,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError>
    where
        T: Serialize + ?Sized,
    {
        let mut pipe = redis::pipe();
        pipe.atomic();
        let task_id = self.enqueue_in(&mut pipe, payload, options)?;

        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(task_id)
    }

    /// Adds the enqueue writes to a caller-managed pipeline.
    ///
    /// This enables bulk enqueue: add any number of tasks to one
    /// `redis::Pipeline` (with `atomic()` set for transactional submission)
    /// and execute it once. The returned id is only meaningful after the
    /// caller successfully executes the pipeline.
    pub fn enqueue_in<T>(
        &self,
        pipe: &mut redis::Pipeline,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<TaskId, QueueError>
    where
        T: Serialize + ?Sized,
    {
        let task_id = TaskId::new();
        let data = self.serializer.encode(payload)?;
        let timeout = options.timeout.unwrap_or(self.config.task_timeout);
        let state_key = self.keys.task_state(task_id);
        let id_text = task_id.to_string();
        let now = now_ts();

        match options.delay {
            Some(delay) if !delay.is_zero() => {
                pipe.zadd(&self.keys.delayed, &id_text, now + delay.as_secs_f64())
                    .ignore();
                pipe.hset(&state_key, field::STATUS, TaskStatus::Delayed.as_u8())
                    .ignore();
            }
            _ => {
                pipe.lpush(&self.keys.pending, &id_text).ignore();
                pipe.hset(&state_key, field::STATUS, TaskStatus::Pending.as_u8())
                    .ignore();
            }
        }

        pipe.hset(&self.keys.payloads, &id_text, data).ignore();
        pipe.hset(&state_key, field::ENQUEUE_TIME, now).ignore();
        pipe.hset(&state_key, field::TIMEOUT, timeout.as_secs_f64())
            .ignore();

        Ok(task_id)
    }

    /// Claims the next available task, blocking up to `timeout`.
    ///
    /// Blocks indefinitely when `timeout` is `None`. The rotate-pop makes
    /// the candidate id visible to every consumer; the claim script then
    /// confirms it for exactly one of them, and losers transparently retry
    /// within the remaining time budget.
    ///
    /// Redis blocking pops only take whole seconds, so each wait rounds up
    /// to at least one second.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Timeout` if no task could be claimed within
    /// `timeout`. No partial claim is left behind in that case.
    pub async fn dequeue<T>(&self, timeout: Option<Duration>) -> Result<(TaskId, T), QueueError>
    where
        T: DeserializeOwned,
    {
        let start = Instant::now();

        loop {
            let remaining = match timeout {
                Some(total) => {
                    let elapsed = start.elapsed();
                    if elapsed >= total {
                        return Err(QueueError::Timeout(total));
                    }
                    Some(total - elapsed)
                }
                None => None,
            };

            let Some(task_id) = self.rotate_pop(remaining).await? else {
                return Err(QueueError::Timeout(timeout.unwrap_or(Duration::ZERO)));
            };

            // None means another consumer confirmed this id first; retry.
            if let Some((task_id, payload)) = self.claim(task_id).await? {
                return Ok((task_id, self.serializer.decode(&payload)?));
            }
        }
    }

    /// Blocking rotate-pop on the pending list.
    ///
    /// Atomically takes the id at the consuming end and reinserts it at the
    /// producing end of the same list, so the id survives a consumer crash
    /// before the claim is confirmed.
    async fn rotate_pop(&self, timeout: Option<Duration>) -> Result<Option<TaskId>, QueueError> {
        let block_secs = match timeout {
            Some(t) => t.as_secs_f64().round().max(1.0) as usize,
            None => 0,
        };

        let mut conn = self.redis.clone();
        let id: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.keys.pending)
            .arg(&self.keys.pending)
            .arg(block_secs)
            .query_async(&mut conn)
            .await?;

        id.map(|text| {
            text.parse().map_err(|e| QueueError::MalformedState {
                field: "task id",
                message: format!("{e}: {text:?}"),
            })
        })
        .transpose()
    }

    /// Confirms a claim for a rotated id.
    ///
    /// Returns `None` when another consumer won the race for this id.
    async fn claim(&self, task_id: TaskId) -> Result<Option<(TaskId, Vec<u8>)>, QueueError> {
        let mut conn = self.redis.clone();
        let reply: Option<(String, Vec<u8>)> = scripts::CLAIM
            .key(&self.keys.pending)
            .key(&self.keys.working)
            .key(&self.keys.payloads)
            .key(self.keys.task_prefix())
            .arg(task_id.to_string())
            .arg(now_ts())
            .arg(TaskStatus::Working.as_u8())
            .invoke_async(&mut conn)
            .await?;

        Ok(reply.map(|(_, payload)| (task_id, payload)))
    }

    /// Returns a claimed task to the queue, optionally with a delay.
    ///
    /// The task id is removed from the working set and reinserted into
    /// pending (or delayed, scored by `now + delay`); the requeue counter
    /// and timestamp are always bumped, and `timeout` overrides the stored
    /// per-task timeout when given. Everything runs as one MULTI/EXEC
    /// transaction.
    ///
    /// A task that is no longer in the working set (e.g. concurrently swept
    /// or released) is an expected race: the writes still apply and a
    /// warning is logged, but no error is raised.
    pub async fn requeue(
        &self,
        task_id: TaskId,
        delay: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<(), QueueError> {
        let state_key = self.keys.task_state(task_id);
        let id_text = task_id.to_string();
        let now = now_ts();

        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut expected: Vec<Option<i64>> = Vec::new();

        pipe.zrem(&self.keys.working, &id_text);
        expected.push(Some(1));

        match delay {
            Some(delay) if !delay.is_zero() => {
                pipe.zadd(&self.keys.delayed, &id_text, now + delay.as_secs_f64());
                expected.push(Some(1));
                pipe.hset(&state_key, field::STATUS, TaskStatus::Delayed.as_u8());
                expected.push(Some(0));
            }
            _ => {
                pipe.lpush(&self.keys.pending, &id_text);
                expected.push(None);
                pipe.hset(&state_key, field::STATUS, TaskStatus::Pending.as_u8());
                expected.push(Some(0));
            }
        }

        pipe.hset(&state_key, field::LAST_REQUEUE_TIME, now);
        expected.push(None);
        pipe.hincr(&state_key, field::REQUEUE_COUNT, 1);
        expected.push(None);

        if let Some(timeout) = timeout {
            pipe.hset(&state_key, field::TIMEOUT, timeout.as_secs_f64());
            expected.push(Some(0));
        }

        let mut conn = self.redis.clone();
        let replies: Vec<i64> = pipe.query_async(&mut conn).await?;

        if !replies_match(&expected, &replies) {
            warn!(task_id = %task_id, replies = ?replies, "Inconsistent requeue of task");
        }

        Ok(())
    }

    /// Terminally releases a task without a result.
    ///
    /// The task id is removed from the working set and its payload and
    /// state hash are deleted immediately, so nothing about the task
    /// remains observable. As with [`requeue`](Self::requeue), a missing
    /// working membership is logged, not raised.
    pub async fn release(&self, task_id: TaskId) -> Result<(), QueueError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        let id_text = task_id.to_string();

        pipe.zrem(&self.keys.working, &id_text);
        pipe.hdel(&self.keys.payloads, &id_text);
        pipe.del(self.keys.task_state(task_id));
        let expected = [Some(1), Some(1), Some(1)];

        let mut conn = self.redis.clone();
        let replies: Vec<i64> = pipe.query_async(&mut conn).await?;

        if !replies_match(&expected, &replies) {
            warn!(task_id = %task_id, replies = ?replies, "Inconsistent release of task");
        }

        Ok(())
    }

    /// Terminally releases a task with a result.
    ///
    /// The result is stored in the state hash together with the release
    /// time and terminal status, and the hash is given a TTL so late
    /// pollers can still observe the outcome for a bounded window. The
    /// payload is deleted either way.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NonTerminalStatus` before any I/O when
    /// `options.status` is not terminal.
    pub async fn release_with<T>(
        &self,
        task_id: TaskId,
        result: &T,
        options: ReleaseOptions,
    ) -> Result<(), QueueError>
    where
        T: Serialize + ?Sized,
    {
        if !options.status.is_terminal() {
            return Err(QueueError::NonTerminalStatus(options.status));
        }

        let data = self.serializer.encode(result)?;
        let result_ttl = options.result_ttl.unwrap_or(self.config.result_ttl);
        let state_key = self.keys.task_state(task_id);
        let id_text = task_id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic();

        pipe.zrem(&self.keys.working, &id_text);
        pipe.hdel(&self.keys.payloads, &id_text);
        pipe.hset(&state_key, field::RESULT, data);
        pipe.hset(&state_key, field::RELEASE_TIME, now_ts());
        pipe.hset(&state_key, field::STATUS, options.status.as_u8());
        pipe.expire(&state_key, result_ttl.as_secs() as i64);
        let expected = [Some(1), Some(1), Some(1), Some(1), Some(0), Some(1)];

        let mut conn = self.redis.clone();
        let replies: Vec<i64> = pipe.query_async(&mut conn).await?;

        if !replies_match(&expected, &replies) {
            warn!(task_id = %task_id, replies = ?replies, "Inconsistent release of task");
        }

        Ok(())
    }

    /// Reclaims stale claims and promotes due delayed tasks.
    ///
    /// A single server-side pass moves every working task whose deadline
    /// has passed, and every delayed task whose ready time has arrived,
    /// back into the pending list in one atomic step.
    ///
    /// Returns the total number of tasks moved. With nothing stale or due
    /// the sweep is a no-op returning 0.
    pub async fn sweep(&self) -> Result<u64, QueueError> {
        let mut conn = self.redis.clone();
        let moved: u64 = scripts::SWEEP
            .key(&self.keys.pending)
            .key(&self.keys.working)
            .key(&self.keys.delayed)
            .key(self.keys.task_prefix())
            .arg(now_ts())
            .arg(TaskStatus::Pending.as_u8())
            .invoke_async(&mut conn)
            .await?;

        Ok(moved)
    }

    /// Returns queue counters in one atomic read.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.redis.clone();
        let (total, pending, working, delayed): (u64, u64, u64, u64) = redis::pipe()
            .atomic()
            .hlen(&self.keys.payloads)
            .llen(&self.keys.pending)
            .zcard(&self.keys.working)
            .zcard(&self.keys.delayed)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats {
            total,
            pending,
            working,
            delayed,
        })
    }

    /// Reads the current state snapshot of a task.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::TaskNotFound` if no state hash exists, which is
    /// the case before enqueue, after a release without result, and after
    /// the result TTL has expired.
    pub async fn task_state(&self, task_id: TaskId) -> Result<TaskState, QueueError> {
        let mut conn = self.redis.clone();
        let hash: std::collections::HashMap<String, Vec<u8>> =
            conn.hgetall(self.keys.task_state(task_id)).await?;

        if hash.is_empty() {
            return Err(QueueError::TaskNotFound(task_id));
        }

        TaskState::from_hash(&hash)
    }

    /// Decodes the result blob of a snapshot with this queue's serializer.
    pub fn decode_result<T>(&self, state: &TaskState) -> Result<Option<T>, QueueError>
    where
        T: DeserializeOwned,
    {
        state
            .result
            .as_deref()
            .map(|bytes| self.serializer.decode(bytes))
            .transpose()
    }
}

/// Compares transaction replies against expectations, `None` meaning the
/// reply value carries no signal (list lengths, counter values).
fn replies_match(expected: &[Option<i64>], replies: &[i64]) -> bool {
    expected.len() == replies.len()
        && expected
            .iter()
            .zip(replies)
            .all(|(want, got)| want.map_or(true, |want| want == *got))
}
