//! Errors shared by the queue and ledger clients.

use taskfan_backend::BackendError;
use taskfan_core::CoreError;
use thiserror::Error;

/// Errors raised by [`crate::TaskQueue`] and [`crate::StatusLedger`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The backend service rejected or failed the call.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// A task could not be encoded as a message body.
    #[error("encoding error: {0}")]
    Encoding(#[from] CoreError),
}
