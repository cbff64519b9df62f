//! Background sweep loop.
//!
//! The sweep must keep running for stale claims to be reclaimed and for
//! delayed tasks to ever become pending, so the loop distinguishes two
//! failure classes:
//!
//! - Redis errors are transient: logged, then retried on the next tick
//! - anything else stops the loop and surfaces through the handle, so a
//!   supervisor can observe the failure and restart

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::queue::WorkQueue;
use crate::serialize::Serializer;

/// Handle to a spawned sweep loop.
///
/// Dropping the handle detaches the loop; call [`shutdown`](Self::shutdown)
/// and [`join`](Self::join) to stop it cooperatively and observe how it
/// ended.
pub struct SweeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), QueueError>>,
}

impl SweeperHandle {
    /// Spawns a sweep loop for the queue.
    ///
    /// The first sweep runs immediately, then one per interval. `interval`
    /// defaults to the queue-wide sweep interval.
    pub fn spawn<S>(queue: Arc<WorkQueue<S>>, interval: Option<Duration>) -> Self
    where
        S: Serializer + 'static,
    {
        let period = interval.unwrap_or(queue.config().sweep_interval);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_sweep_loop(queue, period, shutdown_rx));

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signals the loop to stop after the current sweep, if one is running.
    pub fn shutdown(&self) {
        // Ignore send error - the loop may have already stopped
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the loop to stop.
    ///
    /// Returns `Ok(())` after a cooperative shutdown, the fatal error when
    /// the loop stopped on its own, or `QueueError::SweepAborted` when the
    /// loop task panicked or was cancelled externally.
    pub async fn join(self) -> Result<(), QueueError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(QueueError::SweepAborted(e.to_string())),
        }
    }

    /// Returns whether the loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run_sweep_loop<S>(
    queue: Arc<WorkQueue<S>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), QueueError>
where
    S: Serializer + 'static,
{
    info!(period = ?period, "Sweep loop started");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Sweep loop received shutdown signal");
                return Ok(());
            }
            _ = ticker.tick() => {
                match queue.sweep().await {
                    Ok(moved) => {
                        debug!(requeued = moved, "Sweep finished");
                    }
                    Err(QueueError::Redis(e)) => {
                        warn!(error = %e, "Sweep failed with Redis error, retrying next interval");
                    }
                    Err(e) => {
                        error!(error = %e, "Sweep failed with unexpected error, stopping");
                        return Err(e);
                    }
                }
            }
        }
    }
}
