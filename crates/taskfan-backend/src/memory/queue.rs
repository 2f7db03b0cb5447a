//! In-memory queue with visibility leases.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::queue::{
    BatchSendResult, MessageId, OutgoingMessage, QueueHandle, QueueService, ReceiptHandle,
    ReceivedMessage, MAX_BATCH_ENTRIES,
};
use crate::{BackendError, Provisioned};

const HANDLE_PREFIX: &str = "memory://queues/";

struct StoredMessage {
    id: MessageId,
    body: String,
    visible_at: Instant,
    /// Receipt of the latest delivery.
    receipt: Option<ReceiptHandle>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at <= now
    }
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    sent: u64,
    receive_requests: u64,
    received: u64,
    deleted: u64,
    lease_extensions: u64,
}

/// Counters and a point-in-time depth breakdown for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub visible: u64,
    pub in_flight: u64,
    pub sent: u64,
    /// Calls to `receive`, including empty ones.
    pub receive_requests: u64,
    /// Messages handed out.
    pub received: u64,
    pub deleted: u64,
    pub lease_extensions: u64,
}

/// Queue service held in process memory.
#[derive(Default)]
pub struct MemoryQueue {
    queues: RwLock<HashMap<QueueHandle, QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(name: &str) -> QueueHandle {
        QueueHandle::new(format!("{}{}", HANDLE_PREFIX, name))
    }

    /// Snapshot of a queue's counters, `None` if it does not exist.
    pub async fn stats(&self, name: &str) -> Option<QueueStats> {
        let queues = self.queues.read().await;
        let state = queues.get(&Self::handle_for(name))?;
        let now = Instant::now();
        let visible = state.messages.iter().filter(|m| m.is_visible(now)).count() as u64;

        Some(QueueStats {
            visible,
            in_flight: state.messages.len() as u64 - visible,
            sent: state.sent,
            receive_requests: state.receive_requests,
            received: state.received,
            deleted: state.deleted,
            lease_extensions: state.lease_extensions,
        })
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    async fn create_queue(&self, name: &str) -> Result<(QueueHandle, Provisioned), BackendError> {
        if name.is_empty() {
            return Err(BackendError::InvalidRequest("queue name must not be empty".to_string()));
        }

        let handle = Self::handle_for(name);
        let mut queues = self.queues.write().await;
        if queues.contains_key(&handle) {
            return Ok((handle, Provisioned::AlreadyExists));
        }

        queues.insert(handle.clone(), QueueState::default());
        debug!(queue = %handle, "Created in-memory queue");
        Ok((handle, Provisioned::Created))
    }

    async fn lookup_queue(&self, name: &str) -> Result<QueueHandle, BackendError> {
        let handle = Self::handle_for(name);
        if self.queues.read().await.contains_key(&handle) {
            Ok(handle)
        } else {
            Err(BackendError::QueueNotFound(name.to_string()))
        }
    }

    async fn send_batch(
        &self,
        queue: &QueueHandle,
        entries: Vec<OutgoingMessage>,
    ) -> Result<BatchSendResult, BackendError> {
        if entries.is_empty() || entries.len() > MAX_BATCH_ENTRIES {
            return Err(BackendError::InvalidRequest(format!(
                "batch must hold 1 to {} entries, got {}",
                MAX_BATCH_ENTRIES,
                entries.len()
            )));
        }
        let distinct = {
            let mut ids = HashSet::with_capacity(entries.len());
            entries.iter().all(|e| ids.insert(e.entry_id.as_str()))
        };
        if !distinct {
            return Err(BackendError::InvalidRequest(
                "batch entry ids must be distinct".to_string(),
            ));
        }

        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        let mut result = BatchSendResult::default();
        for entry in entries {
            state.messages.push_back(StoredMessage {
                id: MessageId::new(Uuid::new_v4().to_string()),
                body: entry.body,
                visible_at: now,
                receipt: None,
                receive_count: 0,
            });
            state.sent += 1;
            result.successful.push(entry.entry_id);
        }
        Ok(result)
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        lease: Duration,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        if max_messages == 0 || max_messages > MAX_BATCH_ENTRIES {
            return Err(BackendError::InvalidRequest(format!(
                "max_messages must be between 1 and {}",
                MAX_BATCH_ENTRIES
            )));
        }

        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        let mut delivered = Vec::new();
        for message in state.messages.iter_mut() {
            if delivered.len() == max_messages {
                break;
            }
            if !message.is_visible(now) {
                continue;
            }

            let receipt = ReceiptHandle::new(Uuid::new_v4().to_string());
            message.visible_at = now + lease;
            message.receipt = Some(receipt.clone());
            message.receive_count += 1;

            delivered.push(ReceivedMessage {
                message_id: message.id.clone(),
                receipt,
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }
        state.receive_requests += 1;
        state.received += delivered.len() as u64;
        Ok(delivered)
    }

    async fn extend_lease(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), BackendError> {
        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))?;

        let now = Instant::now();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.receipt.as_ref() == Some(receipt) && !m.is_visible(now))
            .ok_or_else(|| BackendError::ReceiptNotFound(receipt.to_string()))?;

        message.visible_at = now + lease;
        state.lease_extensions += 1;
        Ok(())
    }

    async fn delete(&self, queue: &QueueHandle, receipt: &ReceiptHandle) -> Result<(), BackendError> {
        let mut queues = self.queues.write().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))?;

        let position = state
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| BackendError::ReceiptNotFound(receipt.to_string()))?;

        state.messages.remove(position);
        state.deleted += 1;
        Ok(())
    }

    async fn approximate_depth(&self, queue: &QueueHandle) -> Result<Option<u64>, BackendError> {
        let queues = self.queues.read().await;
        let state = queues
            .get(queue)
            .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))?;

        // Leased messages count too: a crashed worker's message comes back.
        Ok(Some(state.messages.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ids: &[&str]) -> Vec<OutgoingMessage> {
        ids.iter()
            .map(|id| OutgoingMessage {
                entry_id: id.to_string(),
                body: format!("{{\"id\":\"{}\"}}", id),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let queue = MemoryQueue::new();
        let (first, outcome) = queue.create_queue("jobs").await.unwrap();
        assert_eq!(outcome, Provisioned::Created);

        let (second, outcome) = queue.create_queue("jobs").await.unwrap();
        assert_eq!(outcome, Provisioned::AlreadyExists);
        assert_eq!(first, second);
        assert_eq!(queue.lookup_queue("jobs").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_lookup_missing_queue() {
        let queue = MemoryQueue::new();
        let err = queue.lookup_queue("nope").await.unwrap_err();
        assert!(matches!(err, BackendError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let queue = MemoryQueue::new();
        let (handle, _) = queue.create_queue("jobs").await.unwrap();

        let too_many: Vec<String> = (0..11).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = too_many.iter().map(String::as_str).collect();
        assert!(queue.send_batch(&handle, entries(&refs)).await.is_err());
        assert!(queue.send_batch(&handle, Vec::new()).await.is_err());
        assert!(queue.send_batch(&handle, entries(&["a", "a"])).await.is_err());

        let result = queue.send_batch(&handle, entries(&["a", "b"])).await.unwrap();
        assert!(result.all_succeeded());
        assert_eq!(result.successful, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leased_message_is_hidden_until_expiry() {
        let queue = MemoryQueue::new();
        let (handle, _) = queue.create_queue("jobs").await.unwrap();
        queue.send_batch(&handle, entries(&["a"])).await.unwrap();

        let lease = Duration::from_secs(30);
        let first = queue.receive(&handle, 1, lease).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].receive_count, 1);

        assert!(queue.receive(&handle, 1, lease).await.unwrap().is_empty());
        assert_eq!(queue.approximate_depth(&handle).await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive(&handle, 1, lease).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(second[0].receipt, first[0].receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_lease_keeps_message_hidden() {
        let queue = MemoryQueue::new();
        let (handle, _) = queue.create_queue("jobs").await.unwrap();
        queue.send_batch(&handle, entries(&["a"])).await.unwrap();

        let lease = Duration::from_secs(30);
        let msg = queue.receive(&handle, 1, lease).await.unwrap().remove(0);

        tokio::time::advance(Duration::from_secs(15)).await;
        queue.extend_lease(&handle, &msg.receipt, lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert!(queue.receive(&handle, 1, lease).await.unwrap().is_empty());
        let stats = queue.stats("jobs").await.unwrap();
        assert_eq!(stats.lease_extensions, 1);
        assert_eq!(stats.in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_after_expiry_is_rejected() {
        let queue = MemoryQueue::new();
        let (handle, _) = queue.create_queue("jobs").await.unwrap();
        queue.send_batch(&handle, entries(&["a"])).await.unwrap();

        let lease = Duration::from_secs(30);
        let msg = queue.receive(&handle, 1, lease).await.unwrap().remove(0);
        tokio::time::advance(Duration::from_secs(31)).await;

        let err = queue.extend_lease(&handle, &msg.receipt, lease).await.unwrap_err();
        assert!(matches!(err, BackendError::ReceiptNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_message() {
        let queue = MemoryQueue::new();
        let (handle, _) = queue.create_queue("jobs").await.unwrap();
        queue.send_batch(&handle, entries(&["a"])).await.unwrap();

        let msg = queue
            .receive(&handle, 1, Duration::from_secs(30))
            .await
            .unwrap()
            .remove(0);
        queue.delete(&handle, &msg.receipt).await.unwrap();

        assert_eq!(queue.approximate_depth(&handle).await.unwrap(), Some(0));
        assert!(queue.delete(&handle, &msg.receipt).await.is_err());
        assert_eq!(queue.stats("jobs").await.unwrap().deleted, 1);
    }
}
