//! taskfan worker library
//!
//! Fans an ordered task list out over a durable queue and fans results back
//! in through a status ledger:
//!
//! - [`planner`] turns a task list into queue messages, skipping tasks the
//!   ledger already records as completed.
//! - [`worker`] is the consume/execute/acknowledge loop run by every worker.
//! - [`reporter`] joins the task list against the ledger.
//!
//! [`commands`] wires these to the `prepare`, `work` and `status` operations
//! the `taskfan` binary exposes.

pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod json_output;
pub mod lease;
pub mod ledger;
pub mod planner;
pub mod queue;
pub mod reporter;
pub mod worker;

#[cfg(test)]
mod testkit;

pub use commands::Backends;
pub use config::Config;
pub use error::ClientError;
pub use executor::{ProcessRunner, RunOutcome, TaskRunner};
pub use job::JobFile;
pub use ledger::StatusLedger;
pub use planner::{EnqueuePlanner, PrepareReport};
pub use queue::TaskQueue;
pub use reporter::{StatusReport, StatusReporter};
pub use worker::{WorkSummary, WorkerLoop};
