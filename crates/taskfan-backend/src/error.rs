//! Error types for backend operations.

use thiserror::Error;

/// Errors that can occur when talking to a backend service.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Queue does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Status table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Receipt handle does not match a message currently leased.
    #[error("receipt handle not recognised: {0}")]
    ReceiptNotFound(String),

    /// Request rejected before it reached the service.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A stored item is missing a field or holds a value taskfan never writes.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The service failed or could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}
