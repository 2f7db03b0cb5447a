//! Point-in-time status report for a task list.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use taskfan_core::{ListId, StatusRecord, TaskId, TaskList, TaskStatus};

use crate::{ClientError, StatusLedger};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to write report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One task joined with its ledger record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub id: TaskId,
    pub display_name: String,
    /// `None` when the ledger has no record, i.e. the task is pending.
    pub status: Option<StatusRecord>,
}

impl TaskReport {
    pub fn current_status(&self) -> TaskStatus {
        self.status.as_ref().map(|r| r.status).unwrap_or_default()
    }

    /// `"12.34s"` when both timestamps are known, else empty.
    pub fn duration(&self) -> String {
        self.status
            .as_ref()
            .and_then(StatusRecord::duration_secs)
            .map(|secs| format!("{:.2}s", secs))
            .unwrap_or_default()
    }
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed
    }
}

/// A task list joined against the ledger, in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub list_id: ListId,
    pub tasks: Vec<TaskReport>,
}

impl StatusReport {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            match task.current_status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Fixed-width table: id, status, worker, attempts, duration.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Status of {} ({} tasks):", self.list_id, self.tasks.len());
        let _ = writeln!(
            out,
            "{:<36}  {:<10}  {:<24}  {:<8}  {}",
            "ID", "STATUS", "WORKER", "ATTEMPTS", "DURATION"
        );
        let _ = writeln!(out, "{}", "-".repeat(92));

        for task in &self.tasks {
            let (worker, attempts) = match &task.status {
                Some(record) => (
                    record
                        .worker_id
                        .as_ref()
                        .map(|w| w.to_string())
                        .unwrap_or_default(),
                    record.attempt_count.to_string(),
                ),
                None => (String::new(), String::new()),
            };
            let _ = writeln!(
                out,
                "{:<36}  {:<10}  {:<24}  {:<8}  {}",
                task.id.as_str(),
                task.current_status().as_str(),
                worker,
                attempts,
                task.duration()
            );
        }
        out
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(&self.tasks)?)
    }

    /// Write the joined tasks as pretty JSON.
    pub async fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = self.to_json()?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| ReportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "Wrote status report");
        Ok(())
    }
}

/// Read-only view of a list's progress.
pub struct StatusReporter {
    ledger: StatusLedger,
}

impl StatusReporter {
    pub fn new(ledger: StatusLedger) -> Self {
        Self { ledger }
    }

    pub async fn report(&self, list: &TaskList) -> Result<StatusReport, ReportError> {
        let mut records: HashMap<TaskId, StatusRecord> = self
            .ledger
            .records(&list.id)
            .await?
            .into_iter()
            .map(|r| (r.task_id.clone(), r))
            .collect();

        let tasks = list
            .tasks
            .iter()
            .map(|task| TaskReport {
                id: task.id.clone(),
                display_name: task.display_name.clone(),
                status: records.remove(&task.id),
            })
            .collect();

        Ok(StatusReport {
            list_id: list.id.clone(),
            tasks,
        })
    }
}
