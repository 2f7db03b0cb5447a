//! Key-value status store interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskfan_core::{ListId, RecordKey, StatusRecord, TaskStatus, WorkerId};

use crate::{BackendError, Provisioned};

/// Which timestamp a transition writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Sets `started_at` and clears `finished_at` from an earlier attempt.
    Started(DateTime<Utc>),
    /// Sets `finished_at`.
    Finished(DateTime<Utc>),
}

/// Field assignments applied by a single upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub status: TaskStatus,
    pub worker_id: WorkerId,
    pub task_display_name: String,
    pub transition: Transition,
    /// Apply `attempt_count = (attempt_count or 0) + 1` in the same write.
    pub increment_attempt_count: bool,
}

/// Capabilities consumed from the key-value status store.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Create the table keyed by `(list_id, task_id)`, or find the existing one.
    async fn create_table(&self, table: &str) -> Result<Provisioned, BackendError>;

    /// Atomically create-or-update one record and return its new state.
    async fn upsert(
        &self,
        table: &str,
        key: &RecordKey,
        update: RecordUpdate,
    ) -> Result<StatusRecord, BackendError>;

    /// Point lookup.
    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<StatusRecord>, BackendError>;

    /// All records in one list partition.
    async fn query(&self, table: &str, list_id: &ListId) -> Result<Vec<StatusRecord>, BackendError>;
}
