//! Live observation of a single task's status transitions.
//!
//! `watch` relies on Redis keyspace notifications (`notify-keyspace-events`
//! with generic and hash command classes enabled). Every notification
//! triggers a fresh snapshot read, so a missed or coalesced event can delay
//! an update but never produce a wrong one.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::QueueError;
use crate::queue::WorkQueue;
use crate::serialize::Serializer;
use crate::task::{TaskId, TaskState};

impl<S: Serializer> WorkQueue<S> {
    /// Watches a task's status until it is released from the queue.
    ///
    /// Yields the current snapshot first, then a new snapshot for every
    /// observed status change. The stream is finite and not restartable:
    ///
    /// - ends after yielding a snapshot with a terminal status
    /// - ends without a terminal snapshot when the task is released
    ///   without a result (its state hash is deleted)
    /// - ends with `QueueError::Timeout` when `timeout` elapses first
    ///
    /// # Errors
    ///
    /// Fails fast with `QueueError::NotificationsNotConfigured` when the
    /// server does not emit the required keyspace notifications, and with
    /// `QueueError::TaskNotFound` when the task has no state hash.
    pub async fn watch(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<impl Stream<Item = Result<TaskState, QueueError>> + '_, QueueError> {
        self.verify_notification_config().await?;

        let first = self.task_state(task_id).await?;

        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        let db = self.client.get_connection_info().redis.db;
        let channel = format!("__keyspace@{db}__:{}", self.keys.task_state(task_id));
        pubsub.subscribe(&channel).await?;

        Ok(try_stream! {
            let mut status = first.status;
            yield first;
            if status.is_terminal() {
                return;
            }

            let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
            let mut messages = pubsub.on_message();

            loop {
                let message = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, messages.next())
                        .await
                        .map_err(|_| QueueError::Timeout(timeout.unwrap_or(Duration::ZERO)))?,
                    None => messages.next().await,
                };

                // The subscription connection was closed.
                let Some(message) = message else { return };

                let event: String = message.get_payload()?;
                match event.as_str() {
                    // Released without a result.
                    "del" => return,
                    "hset" => {
                        let state = match self.task_state(task_id).await {
                            Ok(state) => state,
                            // Raced with a release that deleted the hash.
                            Err(QueueError::TaskNotFound(_)) => return,
                            Err(e) => Err(e)?,
                        };

                        if state.status != status {
                            status = state.status;
                            let terminal = status.is_terminal();
                            yield state;
                            if terminal {
                                return;
                            }
                        }
                    }
                    _ => {}
                }
            }
        })
    }

    /// Watches a task and returns its decoded terminal result, if any.
    ///
    /// Convenience over [`watch`](Self::watch) for callers that only care
    /// about the outcome: drains the stream and decodes the result of the
    /// final snapshot. Returns `None` when the task was released without a
    /// result.
    pub async fn watch_result<T>(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, QueueError>
    where
        T: DeserializeOwned,
    {
        let stream = self.watch(task_id, timeout).await?;
        tokio::pin!(stream);

        let mut last = None;
        while let Some(state) = stream.next().await {
            last = Some(state?);
        }

        match last {
            Some(state) if state.status.is_terminal() => self.decode_result(&state),
            _ => Ok(None),
        }
    }

    /// Verifies, once per queue instance, that the server is configured to
    /// emit keyspace notifications for generic and hash commands.
    async fn verify_notification_config(&self) -> Result<(), QueueError> {
        if self.notifications_verified.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let config: HashMap<String, String> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async(&mut conn)
            .await?;
        let flags = config
            .get("notify-keyspace-events")
            .cloned()
            .unwrap_or_default();

        if !notification_flags_sufficient(&flags) {
            return Err(QueueError::NotificationsNotConfigured(flags));
        }

        self.notifications_verified.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Tells whether a `notify-keyspace-events` value covers keyspace channels
/// plus generic and hash command events, i.e. includes `KA` or `Kgh`.
fn notification_flags_sufficient(flags: &str) -> bool {
    let has = |class: char| flags.contains(class);
    has('K') && (has('A') || (has('g') && has('h')))
}
