//! Typed status ledger client.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use taskfan_backend::{Provisioned, RecordUpdate, StatusStore, Transition};
use taskfan_core::{ListId, RecordKey, StatusRecord, Task, TaskId, TaskStatus, WorkerId};

use crate::ClientError;

/// Ledger of per-task status records, stored in one table.
///
/// The ledger is the only authority on whether a task is done; the queue
/// holds no completion state.
#[derive(Clone)]
pub struct StatusLedger {
    store: Arc<dyn StatusStore>,
    table: String,
}

impl StatusLedger {
    pub fn new(store: Arc<dyn StatusStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn ensure_table(&self) -> Result<Provisioned, ClientError> {
        Ok(self.store.create_table(&self.table).await?)
    }

    /// Every record written for a list.
    pub async fn records(&self, list_id: &ListId) -> Result<Vec<StatusRecord>, ClientError> {
        Ok(self.store.query(&self.table, list_id).await?)
    }

    /// Current status, `Pending` when no record exists.
    pub async fn status_of(
        &self,
        list_id: &ListId,
        task_id: &TaskId,
    ) -> Result<TaskStatus, ClientError> {
        let key = RecordKey::new(list_id.clone(), task_id.clone());
        let record = self.store.get(&self.table, &key).await?;
        Ok(record.map(|r| r.status).unwrap_or_default())
    }

    /// Record a RUNNING transition and bump the attempt counter.
    pub async fn mark_running(
        &self,
        list_id: &ListId,
        task: &Task,
        worker_id: &WorkerId,
    ) -> Result<StatusRecord, ClientError> {
        self.write(
            list_id,
            task,
            RecordUpdate {
                status: TaskStatus::Running,
                worker_id: worker_id.clone(),
                task_display_name: task.display_name.clone(),
                transition: Transition::Started(Utc::now()),
                increment_attempt_count: true,
            },
        )
        .await
    }

    pub async fn mark_completed(
        &self,
        list_id: &ListId,
        task: &Task,
        worker_id: &WorkerId,
    ) -> Result<StatusRecord, ClientError> {
        self.finish(list_id, task, worker_id, TaskStatus::Completed)
            .await
    }

    pub async fn mark_failed(
        &self,
        list_id: &ListId,
        task: &Task,
        worker_id: &WorkerId,
    ) -> Result<StatusRecord, ClientError> {
        self.finish(list_id, task, worker_id, TaskStatus::Failed).await
    }

    async fn finish(
        &self,
        list_id: &ListId,
        task: &Task,
        worker_id: &WorkerId,
        status: TaskStatus,
    ) -> Result<StatusRecord, ClientError> {
        self.write(
            list_id,
            task,
            RecordUpdate {
                status,
                worker_id: worker_id.clone(),
                task_display_name: task.display_name.clone(),
                transition: Transition::Finished(Utc::now()),
                increment_attempt_count: false,
            },
        )
        .await
    }

    async fn write(
        &self,
        list_id: &ListId,
        task: &Task,
        update: RecordUpdate,
    ) -> Result<StatusRecord, ClientError> {
        let key = RecordKey::new(list_id.clone(), task.id.clone());
        Ok(self.store.upsert(&self.table, &key, update).await?)
    }
}

/// Ids of the tasks among `records` that are COMPLETED.
pub fn completed_ids(records: &[StatusRecord]) -> HashSet<TaskId> {
    records
        .iter()
        .filter(|r| r.status == TaskStatus::Completed)
        .map(|r| r.task_id.clone())
        .collect()
}
