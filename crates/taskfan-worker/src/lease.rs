//! Lease renewal for in-flight deliveries.
//!
//! While a task runs, a [`LeaseKeeper`] extends the message lease every half
//! lease period so the queue does not hand the message to another worker.
//! The keeper is cancelled by [`LeaseKeeper::stop`] or, if the owning future
//! is dropped first, by `Drop`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use taskfan_backend::ReceiptHandle;
use taskfan_core::TaskId;

use crate::TaskQueue;

/// Interval between renewals for a given lease.
pub fn renewal_period(lease: Duration) -> Duration {
    (lease / 2).max(Duration::from_millis(1))
}

/// Background task renewing one delivery's lease.
pub struct LeaseKeeper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u32>>,
}

impl LeaseKeeper {
    /// Start renewing `receipt` on `queue`.
    pub fn start(queue: TaskQueue, receipt: ReceiptHandle, task_id: TaskId, lease: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            run_renewal_loop(queue, receipt, task_id, lease, token).await
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop renewing and wait for an in-progress renewal to finish.
    ///
    /// Returns how many renewals succeeded.
    pub async fn stop(mut self) -> u32 {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(renewals) => renewals,
            Err(e) => {
                error!(error = %e, "Lease renewal task ended abnormally");
                0
            }
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_renewal_loop(
    queue: TaskQueue,
    receipt: ReceiptHandle,
    task_id: TaskId,
    lease: Duration,
    cancel: CancellationToken,
) -> u32 {
    let period = renewal_period(lease);
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut renewals = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                match queue.extend_lease(&receipt, lease).await {
                    Ok(()) => {
                        renewals += 1;
                        debug!(task_id = %task_id, renewals, "Extended message lease");
                    }
                    // Never fatal: the task keeps running on an expiring lease.
                    Err(e) => warn!(task_id = %task_id, error = %e, "Failed to extend message lease"),
                }
            }
        }
    }
    renewals
}
