//! The worker loop: receive, claim, execute, acknowledge, until drained.
//!
//! Each [`WorkerLoop`] consumes one message at a time. Scaling out means
//! running more loops, in more processes or in the same one; loops share
//! nothing but the queue and the ledger.
//!
//! Delivery is at-least-once. Duplicate work is avoided on a best-effort
//! basis by checking the ledger before executing: a task already COMPLETED
//! is acknowledged without running. A task whose lease expires while it is
//! still running can be picked up by a second worker; the ledger records
//! both attempts but does not prevent them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use taskfan_backend::ReceiptHandle;
use taskfan_core::{ListId, Task, TaskStatus, WorkerId};

use crate::executor::{RunOutcome, TaskRunner};
use crate::json_output;
use crate::lease::LeaseKeeper;
use crate::queue::Delivery;
use crate::{ClientError, StatusLedger, TaskQueue};

/// Default message lease.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Default pause between receives while other workers still hold messages.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Worker loop errors. Task failures are not errors; these are.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The queue or the ledger could not be reached.
    #[error("worker infrastructure error: {0}")]
    Client(#[from] ClientError),
}

/// Timing knobs for a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Lease requested on receive and on every renewal.
    pub lease: Duration,
    /// Sleep after an empty receive when the queue is not yet empty.
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Totals for one or more finished loops.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkSummary {
    pub passed: u32,
    pub failed: u32,
    /// Deliveries acknowledged without running because the task was already done.
    pub skipped: u32,
    pub duration: Duration,
}

impl WorkSummary {
    pub fn processed(&self) -> u32 {
        self.passed + self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Combine the summaries of loops that ran side by side.
    pub fn merge(self, other: WorkSummary) -> WorkSummary {
        WorkSummary {
            passed: self.passed + other.passed,
            failed: self.failed + other.failed,
            skipped: self.skipped + other.skipped,
            duration: self.duration.max(other.duration),
        }
    }
}

impl fmt::Display for WorkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Summary ---")?;
        writeln!(f, "Total tasks processed: {}", self.processed())?;
        writeln!(f, "Total duration: {:.2}s", self.duration.as_secs_f64())?;
        writeln!(f, "Number of tasks passed: {}", self.passed)?;
        write!(f, "Number of tasks failed: {}", self.failed)
    }
}

/// What happened to one claimed task.
#[derive(Debug, Clone, PartialEq)]
enum TaskOutcome {
    Completed,
    Failed(String),
}

/// A single sequential consumer of a task queue.
pub struct WorkerLoop {
    queue: TaskQueue,
    ledger: StatusLedger,
    runner: Arc<dyn TaskRunner>,
    list_id: ListId,
    worker_id: WorkerId,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        queue: TaskQueue,
        ledger: StatusLedger,
        runner: Arc<dyn TaskRunner>,
        list_id: ListId,
        worker_id: WorkerId,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            ledger,
            runner,
            list_id,
            worker_id,
            settings,
        }
    }

    /// Consume until the queue is drained.
    ///
    /// Returns `Err` only when the queue or ledger fails; failing tasks are
    /// counted in the summary.
    pub async fn run(&self) -> Result<WorkSummary, WorkerError> {
        let started = Instant::now();
        let mut summary = WorkSummary::default();
        let mut claimed = 0u32;

        info!(
            worker_id = %self.worker_id,
            list_id = %self.list_id,
            queue = %self.queue.name(),
            "Worker loop started"
        );

        loop {
            match self.queue.receive_one(self.settings.lease).await? {
                Some(delivery) => {
                    claimed += 1;
                    self.handle(claimed, delivery, &mut summary).await?;
                }
                None => {
                    let depth = self.queue.approximate_depth().await?;
                    if is_drained(depth) {
                        info!(worker_id = %self.worker_id, depth = ?depth, "Queue drained");
                        json_output::emit_queue_drained(self.worker_id.as_str(), depth);
                        break;
                    }
                    info!(
                        worker_id = %self.worker_id,
                        depth = ?depth,
                        "No message received, queue not empty yet"
                    );
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }

        summary.duration = started.elapsed();
        Ok(summary)
    }

    async fn handle(
        &self,
        number: u32,
        delivery: Delivery,
        summary: &mut WorkSummary,
    ) -> Result<(), WorkerError> {
        let task = match delivery.task {
            Ok(task) => task,
            Err(e) => {
                // It will never decode; keeping it would stop the queue from draining.
                error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Discarding undecodable message"
                );
                self.acknowledge(&delivery.receipt).await;
                return Ok(());
            }
        };
        if delivery.receive_count > 1 {
            warn!(
                task_id = %task.id,
                receive_count = delivery.receive_count,
                "Message redelivered"
            );
        }

        let result = self.process(number, &delivery.receipt, &task, summary).await;

        // Every claimed message is acknowledged, also when the ledger failed
        // and the loop is about to stop.
        self.acknowledge(&delivery.receipt).await;
        result
    }

    async fn process(
        &self,
        number: u32,
        receipt: &ReceiptHandle,
        task: &Task,
        summary: &mut WorkSummary,
    ) -> Result<(), WorkerError> {
        let title = format!("{}. {} ({})", number, task.label(), task.id);
        let status = self.ledger.status_of(&self.list_id, &task.id).await?;
        if status == TaskStatus::Completed {
            info!(task_id = %task.id, "{} - already completed, skipping", title);
            json_output::emit_task_skipped(self.worker_id.as_str(), task.id.as_str());
            summary.skipped += 1;
            return Ok(());
        }

        let keeper = LeaseKeeper::start(
            self.queue.clone(),
            receipt.clone(),
            task.id.clone(),
            self.settings.lease,
        );
        let timer = Instant::now();
        let result = self.execute(&title, task).await;
        let renewals = keeper.stop().await;
        let elapsed = timer.elapsed().as_secs_f64();

        match result? {
            TaskOutcome::Completed => {
                info!(task_id = %task.id, renewals, "Task {} completed in {:.2}s", task.id, elapsed);
                json_output::emit_task_completed(self.worker_id.as_str(), task.id.as_str(), elapsed);
                summary.passed += 1;
            }
            TaskOutcome::Failed(reason) => {
                error!(
                    task_id = %task.id,
                    renewals,
                    reason = %reason,
                    "Task {} failed in {:.2}s",
                    task.id,
                    elapsed
                );
                json_output::emit_task_failed(
                    self.worker_id.as_str(),
                    task.id.as_str(),
                    elapsed,
                    &reason,
                );
                summary.failed += 1;
            }
        }
        Ok(())
    }

    async fn execute(&self, title: &str, task: &Task) -> Result<TaskOutcome, WorkerError> {
        let record = self
            .ledger
            .mark_running(&self.list_id, task, &self.worker_id)
            .await?;
        info!(task_id = %task.id, attempt = record.attempt_count, "Running {}", title);
        json_output::emit_task_claimed(
            self.worker_id.as_str(),
            task.id.as_str(),
            record.attempt_count,
        );

        let outcome = match self.runner.run(&self.list_id, task).await {
            Ok(RunOutcome::Succeeded) => TaskOutcome::Completed,
            Ok(RunOutcome::Failed { exit_code }) => match exit_code {
                Some(code) => TaskOutcome::Failed(format!("exited with code {}", code)),
                None => TaskOutcome::Failed("terminated by signal".to_string()),
            },
            Err(e) => TaskOutcome::Failed(e.to_string()),
        };

        match &outcome {
            TaskOutcome::Completed => {
                self.ledger
                    .mark_completed(&self.list_id, task, &self.worker_id)
                    .await?;
            }
            TaskOutcome::Failed(_) => {
                self.ledger
                    .mark_failed(&self.list_id, task, &self.worker_id)
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) {
        if let Err(e) = self.queue.delete(receipt).await {
            // The lease will lapse and the message comes back; the ledger
            // check then skips it if it completed.
            warn!(worker_id = %self.worker_id, error = %e, "Failed to delete message");
        }
    }
}

/// An empty receive ends the loop only if the queue reports nothing left.
pub fn is_drained(depth: Option<u64>) -> bool {
    matches!(depth, None | Some(0))
}
