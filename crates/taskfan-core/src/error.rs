//! Core domain errors.

use thiserror::Error;

/// Core domain errors for taskfan.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The job document is not valid JSON or does not match the schema.
    #[error("Malformed job file: {0}")]
    MalformedJobFile(#[from] serde_json::Error),

    /// The job document parsed but violates a job-file rule.
    #[error("Invalid job file: {0}")]
    InvalidJobFile(String),

    /// Two tasks in one list share an id.
    #[error("Duplicate task id '{0}' in task list")]
    DuplicateTaskId(String),

    /// Unknown ledger status string.
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
