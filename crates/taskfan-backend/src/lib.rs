//! Backend interfaces for taskfan.
//!
//! The durable queue, the key-value status store and the blob store are
//! external services. This crate describes the capabilities taskfan consumes
//! from each of them as async traits. Two families implement them: the AWS
//! services (SQS, DynamoDB and S3) for runs spread over many machines, and
//! in-memory stand-ins that honour the same contracts for tests and
//! single-process runs.

pub mod aws;
pub mod blob;
pub mod error;
pub mod memory;
pub mod provision;
pub mod queue;
pub mod store;

pub use aws::{DynamoStatusStore, S3BlobStore, SqsQueue};
pub use blob::BlobStore;
pub use error::BackendError;
pub use memory::{MemoryBlobStore, MemoryQueue, MemoryStatusStore, QueueStats};
pub use provision::Provisioned;
pub use queue::{
    BatchEntryFailure, BatchSendResult, MessageId, OutgoingMessage, QueueHandle, QueueService,
    ReceiptHandle, ReceivedMessage, MAX_BATCH_ENTRIES,
};
pub use store::{RecordUpdate, StatusStore, Transition};
