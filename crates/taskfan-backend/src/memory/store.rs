//! In-memory status store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use taskfan_core::{ListId, RecordKey, StatusRecord};

use crate::store::{RecordUpdate, StatusStore, Transition};
use crate::{BackendError, Provisioned};

type Table = BTreeMap<RecordKey, StatusRecord>;

/// Status store held in process memory.
///
/// Every upsert runs under the table write lock, which gives the attempt
/// counter the same read-or-default-then-add atomicity as a conditional
/// update expression on a real store.
#[derive(Default)]
pub struct MemoryStatusStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply(record: &mut StatusRecord, update: RecordUpdate) {
    record.status = update.status;
    record.worker_id = Some(update.worker_id);
    record.task_display_name = update.task_display_name;

    match update.transition {
        Transition::Started(at) => {
            record.started_at = Some(at);
            record.finished_at = None;
        }
        Transition::Finished(at) => {
            record.finished_at = Some(at);
        }
    }

    if update.increment_attempt_count {
        record.attempt_count += 1;
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn create_table(&self, table: &str) -> Result<Provisioned, BackendError> {
        if table.is_empty() {
            return Err(BackendError::InvalidRequest("table name must not be empty".to_string()));
        }

        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Ok(Provisioned::AlreadyExists);
        }
        tables.insert(table.to_string(), Table::new());
        Ok(Provisioned::Created)
    }

    async fn upsert(
        &self,
        table: &str,
        key: &RecordKey,
        update: RecordUpdate,
    ) -> Result<StatusRecord, BackendError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::TableNotFound(table.to_string()))?;

        let record = rows
            .entry(key.clone())
            .or_insert_with(|| StatusRecord::empty(key.task_id.clone()));
        apply(record, update);
        Ok(record.clone())
    }

    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<StatusRecord>, BackendError> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| BackendError::TableNotFound(table.to_string()))?;
        Ok(rows.get(key).cloned())
    }

    async fn query(&self, table: &str, list_id: &ListId) -> Result<Vec<StatusRecord>, BackendError> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| BackendError::TableNotFound(table.to_string()))?;

        Ok(rows
            .iter()
            .filter(|(key, _)| &key.list_id == list_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
