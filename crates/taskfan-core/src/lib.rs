//! taskfan Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Queue or key-value store engines
//! - Process execution
//! - Runtime specifics
//!
//! Everything the planner, the worker loop and the reporter agree on lives
//! here: the job-file schema, the ledger record shape and the identifiers.

pub mod error;
pub mod ids;
pub mod record;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{ListId, TaskId, WorkerId};
pub use record::{RecordKey, StatusRecord};
pub use status::TaskStatus;
pub use task::{Task, TaskList};
