//! Durable queue service interface.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::{BackendError, Provisioned};

/// Largest number of entries a single `send_batch` call accepts.
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Opaque address of a queue, as returned by create or lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueHandle(String);

impl QueueHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying one delivery of a message.
///
/// A new receipt is issued on every receive, so a receipt from an expired
/// lease no longer addresses the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Service-assigned message identifier, stable across deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a batch send. `entry_id` only has to be unique in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub entry_id: String,
    pub body: String,
}

/// A per-entry rejection inside an otherwise accepted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntryFailure {
    pub entry_id: String,
    pub reason: String,
}

/// Per-entry outcome of a batch send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSendResult {
    pub successful: Vec<String>,
    pub failed: Vec<BatchEntryFailure>,
}

impl BatchSendResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A leased message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    pub body: String,
    /// How many times this message has been handed out, this delivery included.
    pub receive_count: u32,
}

/// Capabilities consumed from the durable queue service.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Create the queue, or find the existing one.
    async fn create_queue(&self, name: &str) -> Result<(QueueHandle, Provisioned), BackendError>;

    /// Resolve an existing queue by name.
    async fn lookup_queue(&self, name: &str) -> Result<QueueHandle, BackendError>;

    /// Send up to [`MAX_BATCH_ENTRIES`] messages.
    async fn send_batch(
        &self,
        queue: &QueueHandle,
        entries: Vec<OutgoingMessage>,
    ) -> Result<BatchSendResult, BackendError>;

    /// Lease up to `max_messages` visible messages for `lease`.
    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        lease: Duration,
    ) -> Result<Vec<ReceivedMessage>, BackendError>;

    /// Push the lease deadline of a delivery to `now + lease`.
    async fn extend_lease(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), BackendError>;

    /// Remove a delivered message for good.
    async fn delete(&self, queue: &QueueHandle, receipt: &ReceiptHandle) -> Result<(), BackendError>;

    /// Approximate number of messages still in the queue, if the service knows.
    async fn approximate_depth(&self, queue: &QueueHandle) -> Result<Option<u64>, BackendError>;
}
