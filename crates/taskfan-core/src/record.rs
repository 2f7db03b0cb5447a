//! Ledger record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ListId, TaskId, TaskStatus, WorkerId};

/// Primary key of a ledger record: list id is the partition, task id the sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub list_id: ListId,
    pub task_id: TaskId,
}

impl RecordKey {
    pub fn new(list_id: ListId, task_id: TaskId) -> Self {
        Self { list_id, task_id }
    }
}

/// Per-task state kept by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub task_id: TaskId,

    /// Worker that wrote the latest transition.
    pub worker_id: Option<WorkerId>,

    /// Number of RUNNING transitions so far.
    pub attempt_count: u32,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    pub status: TaskStatus,

    pub task_display_name: String,
}

impl StatusRecord {
    /// An empty record, as the store sees it before the first write.
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            worker_id: None,
            attempt_count: 0,
            started_at: None,
            finished_at: None,
            status: TaskStatus::Pending,
            task_display_name: String::new(),
        }
    }

    /// Seconds between start and finish, when both are known and ordered.
    pub fn duration_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        if finished < started {
            return None;
        }
        Some((finished - started).num_milliseconds() as f64 / 1000.0)
    }
}
