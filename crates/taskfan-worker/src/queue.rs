//! Typed queue client: tasks in, tasks out.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use taskfan_backend::{
    BatchSendResult, MessageId, OutgoingMessage, Provisioned, QueueHandle, QueueService,
    ReceiptHandle,
};
use taskfan_core::{CoreError, ListId, Task};

use crate::ClientError;

/// One leased delivery of a task message.
#[derive(Debug)]
pub struct Delivery {
    pub message_id: MessageId,
    pub receipt: ReceiptHandle,
    pub receive_count: u32,
    /// Decoded body. A body that does not decode is kept as the error so the
    /// caller can still acknowledge the message.
    pub task: Result<Task, CoreError>,
}

/// A queue of serialized [`Task`]s for one task list.
#[derive(Clone)]
pub struct TaskQueue {
    service: Arc<dyn QueueService>,
    handle: QueueHandle,
    name: String,
}

impl TaskQueue {
    /// Name of the queue that carries a list's tasks.
    pub fn queue_name(prefix: &str, list_id: &ListId) -> String {
        format!("{}{}", prefix, list_id)
    }

    /// Create the queue if needed.
    pub async fn ensure(
        service: Arc<dyn QueueService>,
        name: impl Into<String>,
    ) -> Result<(Self, Provisioned), ClientError> {
        let name = name.into();
        let (handle, provisioned) = service.create_queue(&name).await?;
        debug!(queue = %name, outcome = %provisioned, "Queue provisioned");
        Ok((
            Self {
                service,
                handle,
                name,
            },
            provisioned,
        ))
    }

    /// Attach to a queue that must already exist.
    pub async fn open(
        service: Arc<dyn QueueService>,
        name: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let name = name.into();
        let handle = service.lookup_queue(&name).await?;
        Ok(Self {
            service,
            handle,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one batch of tasks, keyed by task id.
    pub async fn send_tasks(&self, tasks: &[Task]) -> Result<BatchSendResult, ClientError> {
        let entries = tasks
            .iter()
            .map(|task| {
                Ok(OutgoingMessage {
                    entry_id: task.id.to_string(),
                    body: task.to_message_body()?,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(self.service.send_batch(&self.handle, entries).await?)
    }

    /// Lease at most one task for `lease`.
    pub async fn receive_one(&self, lease: Duration) -> Result<Option<Delivery>, ClientError> {
        let mut messages = self.service.receive(&self.handle, 1, lease).await?;
        let Some(message) = messages.pop() else {
            return Ok(None);
        };

        Ok(Some(Delivery {
            task: Task::from_message_body(&message.body),
            message_id: message.message_id,
            receipt: message.receipt,
            receive_count: message.receive_count,
        }))
    }

    pub async fn extend_lease(
        &self,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), ClientError> {
        Ok(self.service.extend_lease(&self.handle, receipt, lease).await?)
    }

    /// Acknowledge a delivery.
    pub async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), ClientError> {
        Ok(self.service.delete(&self.handle, receipt).await?)
    }

    pub async fn approximate_depth(&self) -> Result<Option<u64>, ClientError> {
        Ok(self.service.approximate_depth(&self.handle).await?)
    }
}
