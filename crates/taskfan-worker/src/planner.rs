//! Enqueue planner: task list in, queue messages out.
//!
//! `prepare` provisions the ledger table and the list's queue, subtracts the
//! tasks the ledger already records as COMPLETED and sends the rest in
//! bounded-concurrency batches. Running it twice for the same list is safe:
//! completed work is never re-enqueued, anything else is.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use taskfan_backend::{
    BatchEntryFailure, BlobStore, Provisioned, QueueService, MAX_BATCH_ENTRIES,
};
use taskfan_core::{Task, TaskId, TaskList};

use crate::json_output;
use crate::ledger::completed_ids;
use crate::{ClientError, StatusLedger, TaskQueue};

/// Default number of tasks per send.
pub const DEFAULT_BATCH_SIZE: usize = MAX_BATCH_ENTRIES;

/// Default number of batches in flight.
pub const DEFAULT_SEND_CONCURRENCY: usize = 2;

/// Errors from `prepare`.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("batch {batch} of {total} had {} rejected entries ({})", .failures.len(), entry_ids(.failures))]
    BatchRejected {
        batch: usize,
        total: usize,
        failures: Vec<BatchEntryFailure>,
    },

    #[error("invalid planner settings: {0}")]
    InvalidSettings(String),
}

fn entry_ids(failures: &[BatchEntryFailure]) -> String {
    failures
        .iter()
        .map(|f| f.entry_id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where job files are archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub bucket: String,
    pub key_prefix: String,
}

impl ArchiveTarget {
    /// Object key for a list's job file.
    pub fn key_for(&self, list: &TaskList) -> String {
        format!("{}{}.json", self.key_prefix, list.id)
    }
}

/// Planner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerSettings {
    pub queue_prefix: String,
    pub batch_size: usize,
    pub send_concurrency: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            queue_prefix: crate::config::DEFAULT_QUEUE_PREFIX.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            send_concurrency: DEFAULT_SEND_CONCURRENCY,
        }
    }
}

impl PlannerSettings {
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_ENTRIES {
            return Err(PlannerError::InvalidSettings(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_ENTRIES, self.batch_size
            )));
        }
        if self.send_concurrency == 0 {
            return Err(PlannerError::InvalidSettings(
                "send concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// What `prepare` did.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareReport {
    pub queue_name: String,
    pub table: Provisioned,
    pub queue: Provisioned,
    pub total_tasks: usize,
    /// Ledger records that existed before this run, in any status.
    pub previously_run: usize,
    pub already_completed: usize,
    pub enqueued: usize,
    pub batches: usize,
    /// `bucket/key` of the archived job file, if archiving succeeded.
    pub archived_to: Option<String>,
}

impl fmt::Display for PrepareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queue: {} ({})", self.queue_name, self.queue)?;
        writeln!(f, "Status table: {}", self.table)?;
        writeln!(f, "Total tasks: {}", self.total_tasks)?;
        writeln!(f, "Previously run: {}", self.previously_run)?;
        writeln!(f, "Already completed: {}", self.already_completed)?;
        write!(f, "Enqueued: {} in {} batches", self.enqueued, self.batches)?;
        if let Some(location) = &self.archived_to {
            write!(f, "\nArchived to: {}", location)?;
        }
        Ok(())
    }
}

/// Tasks that still have to run, in list order.
pub fn pending_tasks<'a>(list: &'a TaskList, completed: &HashSet<TaskId>) -> Vec<&'a Task> {
    list.tasks
        .iter()
        .filter(|task| !completed.contains(&task.id))
        .collect()
}

/// Turns task lists into queued work.
pub struct EnqueuePlanner {
    queues: Arc<dyn QueueService>,
    ledger: StatusLedger,
    settings: PlannerSettings,
    archive: Option<(Arc<dyn BlobStore>, ArchiveTarget)>,
}

impl EnqueuePlanner {
    pub fn new(
        queues: Arc<dyn QueueService>,
        ledger: StatusLedger,
        settings: PlannerSettings,
    ) -> Result<Self, PlannerError> {
        settings.validate()?;
        Ok(Self {
            queues,
            ledger,
            settings,
            archive: None,
        })
    }

    /// Archive every prepared job file to `target`.
    pub fn with_archive(mut self, blobs: Arc<dyn BlobStore>, target: ArchiveTarget) -> Self {
        self.archive = Some((blobs, target));
        self
    }

    pub fn queue_name(&self, list: &TaskList) -> String {
        TaskQueue::queue_name(&self.settings.queue_prefix, &list.id)
    }

    /// Provision, filter and enqueue `list`.
    ///
    /// `raw` is the job file as read from disk, used for archiving.
    pub async fn prepare(
        &self,
        list: &TaskList,
        raw: Option<&[u8]>,
    ) -> Result<PrepareReport, PlannerError> {
        let table = self.ledger.ensure_table().await?;
        let queue_name = self.queue_name(list);
        let (queue, queue_outcome) = TaskQueue::ensure(self.queues.clone(), &queue_name).await?;
        info!(
            list_id = %list.id,
            table = %self.ledger.table(),
            table_outcome = %table,
            queue = %queue_name,
            queue_outcome = %queue_outcome,
            "Provisioned ledger and queue"
        );

        let records = self.ledger.records(&list.id).await?;
        let previously_run = records.len();
        let completed = completed_ids(&records);

        let pending = pending_tasks(list, &completed);
        let already_completed = list.len() - pending.len();
        info!(
            list_id = %list.id,
            total = list.len(),
            previously_run,
            already_completed,
            to_enqueue = pending.len(),
            "Computed tasks to enqueue"
        );

        let archived_to = match raw {
            Some(bytes) => self.archive(list, bytes).await,
            None => None,
        };

        let batches: Vec<Vec<Task>> = pending
            .chunks(self.settings.batch_size)
            .map(|chunk| chunk.iter().map(|task| (*task).clone()).collect())
            .collect();
        let batch_count = batches.len();
        let enqueued = self.send_all(&queue, batches).await?;

        json_output::emit_prepared(list.id.as_str(), list.len(), already_completed, enqueued);

        Ok(PrepareReport {
            queue_name,
            table,
            queue: queue_outcome,
            total_tasks: list.len(),
            previously_run,
            already_completed,
            enqueued,
            batches: batch_count,
            archived_to,
        })
    }

    /// Send batches, at most `send_concurrency` at a time.
    ///
    /// After the first failure no new batch is started; batches already in
    /// flight are awaited before the failure is returned.
    async fn send_all(&self, queue: &TaskQueue, batches: Vec<Vec<Task>>) -> Result<usize, PlannerError> {
        let total = batches.len();
        let mut waiting = batches.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut first_error: Option<PlannerError> = None;
        let mut sent = 0;

        loop {
            while first_error.is_none() && in_flight.len() < self.settings.send_concurrency {
                let Some((index, batch)) = waiting.next() else {
                    break;
                };
                in_flight.push(send_batch(queue, index + 1, total, batch));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(count) => sent += count,
                Err(e) => {
                    error!(error = %e, "Batch send failed, not starting further batches");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    async fn archive(&self, list: &TaskList, bytes: &[u8]) -> Option<String> {
        let (blobs, target) = self.archive.as_ref()?;
        let key = target.key_for(list);

        match blobs.put(&target.bucket, &key, bytes.to_vec()).await {
            Ok(()) => {
                info!(bucket = %target.bucket, key = %key, "Archived job file");
                Some(format!("{}/{}", target.bucket, key))
            }
            Err(e) => {
                warn!(bucket = %target.bucket, key = %key, error = %e, "Failed to archive job file");
                None
            }
        }
    }
}

async fn send_batch(
    queue: &TaskQueue,
    batch: usize,
    total: usize,
    tasks: Vec<Task>,
) -> Result<usize, PlannerError> {
    let result = queue.send_tasks(&tasks).await?;
    if !result.all_succeeded() {
        return Err(PlannerError::BatchRejected {
            batch,
            total,
            failures: result.failed,
        });
    }
    debug!(batch, total, sent = result.successful.len(), "Sent batch");
    Ok(result.successful.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testkit::{task_list, FlakyQueue, Fixture, QUEUE_NAME, TABLE};
    use taskfan_backend::{MemoryBlobStore, MemoryQueue, MemoryStatusStore};

    fn planner(queues: Arc<dyn QueueService>, ledger: StatusLedger) -> EnqueuePlanner {
        EnqueuePlanner::new(queues, ledger, PlannerSettings::default()).unwrap()
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t{:02}", i)).collect()
    }

    #[test]
    fn test_settings_validation() {
        assert!(PlannerSettings::default().validate().is_ok());
        for (batch_size, send_concurrency) in [(0, 2), (11, 2), (10, 0)] {
            let settings = PlannerSettings {
                batch_size,
                send_concurrency,
                ..PlannerSettings::default()
            };
            assert!(matches!(
                settings.validate(),
                Err(PlannerError::InvalidSettings(_))
            ));
        }
    }

    #[test]
    fn test_pending_tasks_keeps_list_order() {
        let list = task_list(&["a", "b", "c", "d"]);
        let done: HashSet<TaskId> = [TaskId::new("b"), TaskId::new("zzz")].into();
        let pending: Vec<&str> = pending_tasks(&list, &done)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(pending, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_fresh_list_is_fully_enqueued() {
        let memory = Arc::new(MemoryQueue::new());
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);
        let list = task_list(&["a", "b", "c"]);

        let report = planner(memory.clone(), ledger).prepare(&list, None).await.unwrap();

        assert_eq!(report.queue_name, QUEUE_NAME);
        assert_eq!(report.table, Provisioned::Created);
        assert_eq!(report.queue, Provisioned::Created);
        assert_eq!((report.total_tasks, report.enqueued, report.batches), (3, 3, 1));
        assert_eq!(report.already_completed, 0);
        assert_eq!(memory.stats(QUEUE_NAME).await.unwrap().visible, 3);
    }

    #[tokio::test]
    async fn test_rerun_skips_completed_tasks() {
        let fx = Fixture::with_tasks(&["a", "b", "c"]).await;
        fx.complete("b").await;

        let report = planner(fx.memory.clone(), fx.ledger.clone())
            .prepare(&fx.list, None)
            .await
            .unwrap();

        assert_eq!(report.table, Provisioned::AlreadyExists);
        assert_eq!(report.queue, Provisioned::AlreadyExists);
        assert_eq!((report.previously_run, report.already_completed), (1, 1));
        assert_eq!(report.enqueued, 2);

        let mut queued = Vec::new();
        while let Some(d) = fx.queue.receive_one(Duration::from_secs(30)).await.unwrap() {
            queued.push(d.task.unwrap().id.into_inner());
        }
        queued.sort();
        assert_eq!(queued, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_running_and_failed_tasks_are_enqueued_again() {
        let fx = Fixture::with_tasks(&["done", "running", "failed", "new"]).await;
        fx.complete("done").await;
        fx.start("running").await;
        fx.start("failed").await;
        fx.ledger
            .mark_failed(&fx.list_id(), &fx.task("failed"), &"w".into())
            .await
            .unwrap();

        let report = planner(fx.memory.clone(), fx.ledger.clone())
            .prepare(&fx.list, None)
            .await
            .unwrap();

        assert_eq!(report.previously_run, 3);
        assert_eq!(report.enqueued, 3);
    }

    #[tokio::test]
    async fn test_fully_completed_list_enqueues_nothing() {
        let fx = Fixture::with_tasks(&["a", "b"]).await;
        fx.complete("a").await;
        fx.complete("b").await;

        let report = planner(fx.memory.clone(), fx.ledger.clone())
            .prepare(&fx.list, None)
            .await
            .unwrap();

        assert_eq!((report.enqueued, report.batches), (0, 0));
        assert_eq!(fx.queue_stats().await.sent, 0);
    }

    #[tokio::test]
    async fn test_batches_respect_size_and_concurrency() {
        let flaky = Arc::new(FlakyQueue::new().with_send_delay(Duration::from_millis(20)));
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);
        let names = ids(25);
        let list = task_list(&names.iter().map(String::as_str).collect::<Vec<_>>());

        let report = planner(flaky.clone(), ledger).prepare(&list, None).await.unwrap();

        assert_eq!((report.enqueued, report.batches), (25, 3));
        assert_eq!(flaky.send_attempts(), 3);
        assert!(flaky.max_sends_in_flight() <= DEFAULT_SEND_CONCURRENCY);
        assert_eq!(flaky.memory().stats(QUEUE_NAME).await.unwrap().sent, 25);
    }

    #[tokio::test]
    async fn test_rejected_entry_stops_further_batches() {
        let flaky = Arc::new(
            FlakyQueue::new()
                .rejecting_entry("t00")
                .with_send_delay(Duration::from_millis(5)),
        );
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);
        let names = ids(50);
        let list = task_list(&names.iter().map(String::as_str).collect::<Vec<_>>());

        let err = planner(flaky.clone(), ledger).prepare(&list, None).await.unwrap_err();

        match err {
            PlannerError::BatchRejected {
                batch,
                total,
                failures,
            } => {
                assert_eq!((batch, total), (1, 5));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].entry_id, "t00");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The rejected batch and its peer, plus at most one started while
        // the peer's result was handled first.
        assert!(flaky.send_attempts() < 5);
        let stats = flaky.memory().stats(QUEUE_NAME).await.unwrap();
        assert!(stats.sent >= 19);
    }

    #[tokio::test]
    async fn test_unavailable_queue_fails_prepare() {
        let flaky = Arc::new(FlakyQueue::new());
        flaky.go_down();
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);

        let err = planner(flaky, ledger)
            .prepare(&task_list(&["a"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Client(_)));
    }

    #[tokio::test]
    async fn test_job_file_is_archived() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);
        let target = ArchiveTarget {
            bucket: "jobs".to_string(),
            key_prefix: "ci/".to_string(),
        };
        let planner = planner(Arc::new(MemoryQueue::new()), ledger).with_archive(blobs.clone(), target);

        let report = planner
            .prepare(&task_list(&["a"]), Some(b"{\"id\":\"run-1\"}"))
            .await
            .unwrap();

        assert_eq!(report.archived_to.as_deref(), Some("jobs/ci/run-1.json"));
        assert_eq!(
            blobs.get("jobs", "ci/run-1.json").await.as_deref(),
            Some(&b"{\"id\":\"run-1\"}"[..])
        );
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_block_enqueue() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let ledger = StatusLedger::new(Arc::new(MemoryStatusStore::new()), TABLE);
        let target = ArchiveTarget {
            bucket: String::new(),
            key_prefix: String::new(),
        };
        let planner = planner(Arc::new(MemoryQueue::new()), ledger).with_archive(blobs, target);

        let report = planner
            .prepare(&task_list(&["a", "b"]), Some(b"{}"))
            .await
            .unwrap();

        assert_eq!(report.archived_to, None);
        assert_eq!(report.enqueued, 2);
    }
}
