//! taskfan configuration.
//!
//! Defaults, overridden by `TASKFAN_*` environment variables, overridden in
//! turn by command-line flags in `main`.

use std::ffi::OsStr;
use std::time::Duration;

use thiserror::Error;

use taskfan_backend::MAX_BATCH_ENTRIES;
use taskfan_core::{ListId, WorkerId};

use crate::planner::{ArchiveTarget, PlannerSettings};
use crate::worker::WorkerSettings;
use crate::TaskQueue;

pub const STATUS_TABLE_ENV: &str = "TASKFAN_STATUS_TABLE";
pub const QUEUE_PREFIX_ENV: &str = "TASKFAN_QUEUE_PREFIX";
pub const ARCHIVE_BUCKET_ENV: &str = "TASKFAN_ARCHIVE_BUCKET";
pub const ARCHIVE_KEY_PREFIX_ENV: &str = "TASKFAN_ARCHIVE_KEY_PREFIX";
pub const WORKER_ID_ENV: &str = "TASKFAN_WORKER_ID";

pub const DEFAULT_STATUS_TABLE: &str = "taskfan";
pub const DEFAULT_QUEUE_PREFIX: &str = "taskfan_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
}

/// taskfan configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ledger table name.
    pub status_table: String,

    /// Prepended to the list id to name its queue.
    pub queue_prefix: String,

    /// Bucket job files are archived to. Archiving is off when unset.
    pub archive_bucket: Option<String>,

    pub archive_key_prefix: String,

    /// Identity recorded in the ledger by this process's workers.
    pub worker_id: WorkerId,

    /// Message lease in seconds.
    pub lease_secs: u64,

    /// Pause between receives while the queue is not yet empty.
    pub poll_interval_ms: u64,

    /// Tasks per send.
    pub batch_size: usize,

    /// Batches in flight during prepare.
    pub send_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_table: DEFAULT_STATUS_TABLE.to_string(),
            queue_prefix: DEFAULT_QUEUE_PREFIX.to_string(),
            archive_bucket: None,
            archive_key_prefix: String::new(),
            worker_id: worker_id_from_hostname(&gethostname::gethostname()),
            lease_secs: 30,
            poll_interval_ms: 1000,
            batch_size: MAX_BATCH_ENTRIES,
            send_concurrency: 2,
        }
    }
}

fn worker_id_from_hostname(hostname: &OsStr) -> WorkerId {
    let hostname = hostname.to_string_lossy();
    let hostname = hostname.trim();
    if hostname.is_empty() {
        WorkerId::new("unknown")
    } else {
        WorkerId::new(hostname)
    }
}

impl Config {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            status_table: get(STATUS_TABLE_ENV).unwrap_or(defaults.status_table),
            queue_prefix: get(QUEUE_PREFIX_ENV).unwrap_or(defaults.queue_prefix),
            archive_bucket: get(ARCHIVE_BUCKET_ENV),
            archive_key_prefix: get(ARCHIVE_KEY_PREFIX_ENV).unwrap_or_default(),
            worker_id: get(WORKER_ID_ENV)
                .map(WorkerId::new)
                .unwrap_or(defaults.worker_id),
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_table.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "status table",
            });
        }
        if self.worker_id.as_str().trim().is_empty() {
            return Err(ConfigError::Empty { field: "worker id" });
        }
        check_range("lease seconds", self.lease_secs, 1, 12 * 60 * 60)?;
        check_range("batch size", self.batch_size as u64, 1, MAX_BATCH_ENTRIES as u64)?;
        check_range("send concurrency", self.send_concurrency as u64, 1, 64)?;
        Ok(())
    }

    pub fn queue_name(&self, list_id: &ListId) -> String {
        TaskQueue::queue_name(&self.queue_prefix, list_id)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            lease: self.lease(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn planner_settings(&self) -> PlannerSettings {
        PlannerSettings {
            queue_prefix: self.queue_prefix.clone(),
            batch_size: self.batch_size,
            send_concurrency: self.send_concurrency,
        }
    }

    pub fn archive_target(&self) -> Option<ArchiveTarget> {
        self.archive_bucket.as_ref().map(|bucket| ArchiveTarget {
            bucket: bucket.clone(),
            key_prefix: self.archive_key_prefix.clone(),
        })
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}
