//! The `prepare`, `work` and `status` operations.
//!
//! Each takes the backends explicitly so the same code drives the AWS
//! services and the in-process reference backends.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use taskfan_backend::{
    aws, BlobStore, DynamoStatusStore, MemoryBlobStore, MemoryQueue, MemoryStatusStore,
    QueueService, S3BlobStore, SqsQueue, StatusStore,
};
use taskfan_core::{ListId, TaskList};

use crate::config::ConfigError;
use crate::executor::TaskRunner;
use crate::planner::{EnqueuePlanner, PlannerError, PrepareReport};
use crate::reporter::{ReportError, StatusReport, StatusReporter};
use crate::worker::{WorkSummary, WorkerError, WorkerLoop};
use crate::{json_output, ClientError, Config, JobFile, StatusLedger, TaskQueue};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Prepare failed: {0}")]
    Prepare(#[from] PlannerError),

    #[error("Worker failed: {0}")]
    Worker(#[from] WorkerError),

    #[error("Status report failed: {0}")]
    Report(#[from] ReportError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Worker task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The external services taskfan runs against.
#[derive(Clone)]
pub struct Backends {
    pub queues: Arc<dyn QueueService>,
    pub store: Arc<dyn StatusStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Backends {
    /// SQS, DynamoDB and S3, with region and credentials from the environment.
    pub async fn aws() -> Self {
        let sdk = aws::load_config().await;
        info!(region = ?sdk.region(), "Using AWS backends");
        Self {
            queues: Arc::new(SqsQueue::new(&sdk)),
            store: Arc::new(DynamoStatusStore::new(&sdk)),
            blobs: Arc::new(S3BlobStore::new(&sdk)),
        }
    }

    /// Fresh in-process backends. Their state lives as long as the process.
    pub fn in_memory() -> Self {
        Self {
            queues: Arc::new(MemoryQueue::new()),
            store: Arc::new(MemoryStatusStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    pub fn ledger(&self, config: &Config) -> StatusLedger {
        StatusLedger::new(self.store.clone(), config.status_table.clone())
    }
}

/// Provision and enqueue a job file's pending tasks.
pub async fn prepare(
    backends: &Backends,
    config: &Config,
    job: &JobFile,
) -> Result<PrepareReport, CommandError> {
    config.validate()?;
    let mut planner = EnqueuePlanner::new(
        backends.queues.clone(),
        backends.ledger(config),
        config.planner_settings(),
    )?;
    if let Some(target) = config.archive_target() {
        planner = planner.with_archive(backends.blobs.clone(), target);
    }

    let report = planner.prepare(&job.list, Some(&job.raw)).await?;
    info!(
        list_id = %job.list.id,
        enqueued = report.enqueued,
        already_completed = report.already_completed,
        "Prepared task list"
    );
    Ok(report)
}

/// Run `workers` loops side by side until the list's queue drains.
///
/// With more than one loop, each gets the configured worker id suffixed by
/// its index. Every loop is awaited; the first infrastructure error wins.
pub async fn work(
    backends: &Backends,
    config: &Config,
    list_id: &ListId,
    runner: Arc<dyn TaskRunner>,
    workers: usize,
) -> Result<WorkSummary, CommandError> {
    config.validate()?;
    let queue = TaskQueue::open(backends.queues.clone(), config.queue_name(list_id)).await?;
    let ledger = backends.ledger(config);
    let workers = workers.max(1);

    let mut set = JoinSet::new();
    for index in 0..workers {
        let worker_id = if workers == 1 {
            config.worker_id.clone()
        } else {
            config.worker_id.with_suffix(index)
        };
        let worker = WorkerLoop::new(
            queue.clone(),
            ledger.clone(),
            runner.clone(),
            list_id.clone(),
            worker_id.clone(),
            config.worker_settings(),
        );
        set.spawn(async move {
            let result = worker.run().await;
            if let Err(e) = &result {
                error!(worker_id = %worker_id, error = %e, "Worker loop stopped");
            }
            result
        });
    }

    let mut summary: Option<WorkSummary> = None;
    let mut first_error: Option<CommandError> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(loop_summary)) => {
                summary = Some(match summary {
                    Some(total) => total.merge(loop_summary),
                    None => loop_summary,
                });
            }
            Ok(Err(e)) => {
                first_error.get_or_insert(e.into());
            }
            Err(e) => {
                error!(error = %e, "Worker loop task failed");
                first_error.get_or_insert(e.into());
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let summary = summary.unwrap_or_default();
    info!(
        list_id = %list_id,
        processed = summary.processed(),
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        "All worker loops finished"
    );
    json_output::emit_summary(
        summary.processed(),
        summary.passed,
        summary.failed,
        summary.duration.as_secs_f64(),
    );
    Ok(summary)
}

/// Join a list against the ledger, optionally writing the result as JSON.
pub async fn status(
    backends: &Backends,
    config: &Config,
    list: &TaskList,
    out_file: Option<&Path>,
) -> Result<StatusReport, CommandError> {
    let report = StatusReporter::new(backends.ledger(config)).report(list).await?;
    if let Some(path) = out_file {
        report.write_json(path).await?;
    }
    Ok(report)
}
