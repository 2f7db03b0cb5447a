//! [`QueueService`] over Amazon SQS.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs::types::{
    MessageSystemAttributeName, QueueAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use tracing::debug;

use super::{unavailable, whole_seconds};
use crate::queue::{
    BatchEntryFailure, BatchSendResult, MessageId, OutgoingMessage, QueueHandle, QueueService,
    ReceiptHandle, ReceivedMessage, MAX_BATCH_ENTRIES,
};
use crate::{BackendError, Provisioned};

/// Tag put on every queue taskfan creates.
const QUEUE_TAG: (&str, &str) = ("created-by", "taskfan");

/// SQS standard queues. The queue URL is the [`QueueHandle`].
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
}

impl SqsQueue {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    async fn queue_url(&self, name: &str) -> Result<Option<QueueHandle>, BackendError> {
        match self.client.get_queue_url().queue_name(name).send().await {
            Ok(output) => Ok(output.queue_url().map(QueueHandle::new)),
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .is_some_and(|e| e.is_queue_does_not_exist());
                if missing {
                    Ok(None)
                } else {
                    Err(unavailable(e))
                }
            }
        }
    }
}

#[async_trait]
impl QueueService for SqsQueue {
    async fn create_queue(&self, name: &str) -> Result<(QueueHandle, Provisioned), BackendError> {
        if let Some(handle) = self.queue_url(name).await? {
            return Ok((handle, Provisioned::AlreadyExists));
        }

        let created = self
            .client
            .create_queue()
            .queue_name(name)
            .tags(QUEUE_TAG.0, QUEUE_TAG.1)
            .send()
            .await;
        match created {
            Ok(output) => {
                let url = output.queue_url().ok_or_else(|| {
                    BackendError::Unavailable(format!("no URL returned for queue {}", name))
                })?;
                debug!(queue = %name, url = %url, "Created SQS queue");
                Ok((QueueHandle::new(url), Provisioned::Created))
            }
            // Another process created it between the lookup and the create.
            Err(e) if e.as_service_error().is_some_and(|e| e.is_queue_name_exists()) => {
                let handle = self.lookup_queue(name).await?;
                Ok((handle, Provisioned::AlreadyExists))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn lookup_queue(&self, name: &str) -> Result<QueueHandle, BackendError> {
        self.queue_url(name)
            .await?
            .ok_or_else(|| BackendError::QueueNotFound(name.to_string()))
    }

    async fn send_batch(
        &self,
        queue: &QueueHandle,
        entries: Vec<OutgoingMessage>,
    ) -> Result<BatchSendResult, BackendError> {
        if entries.is_empty() || entries.len() > MAX_BATCH_ENTRIES {
            return Err(BackendError::InvalidRequest(format!(
                "batch must hold between 1 and {} entries, got {}",
                MAX_BATCH_ENTRIES,
                entries.len()
            )));
        }

        let entries = entries
            .into_iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(entry.entry_id)
                    .message_body(entry.body)
                    .build()
                    .map_err(|e| BackendError::InvalidRequest(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue.as_str())
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(unavailable)?;

        Ok(BatchSendResult {
            successful: output.successful().iter().map(|e| e.id().to_string()).collect(),
            failed: output
                .failed()
                .iter()
                .map(|e| BatchEntryFailure {
                    entry_id: e.id().to_string(),
                    reason: failure_reason(e.code(), e.message()),
                })
                .collect(),
        })
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

        let output = self
            .client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(max_messages as i32)
            .visibility_timeout(whole_seconds(lease)?)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(unavailable)?;

        output
            .messages()
            .iter()
            .map(|message| {
                let (Some(id), Some(receipt)) = (message.message_id(), message.receipt_handle())
                else {
                    return Err(BackendError::Unavailable(
                        "received a message without id or receipt handle".to_string(),
                    ));
                };
                let receive_count = message
                    .attributes()
                    .and_then(|a| a.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                    .and_then(|count| count.parse().ok())
                    .unwrap_or(1);

                Ok(ReceivedMessage {
                    message_id: MessageId::new(id),
                    receipt: ReceiptHandle::new(receipt),
                    body: message.body().unwrap_or_default().to_string(),
                    receive_count,
                })
            })
            .collect()
    }

    async fn extend_lease(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), BackendError> {
        let result = self
            .client
            .change_message_visibility()
            .queue_url(queue.as_str())
            .receipt_handle(receipt.as_str())
            .visibility_timeout(whole_seconds(lease)?)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error().is_some_and(|e| {
                    e.is_message_not_inflight() || e.is_receipt_handle_is_invalid()
                }) =>
            {
                Err(BackendError::ReceiptNotFound(receipt.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn delete(&self, queue: &QueueHandle, receipt: &ReceiptHandle) -> Result<(), BackendError> {
        let result = self
            .client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt.as_str())
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|e| e.is_receipt_handle_is_invalid()) => {
                Err(BackendError::ReceiptNotFound(receipt.to_string()))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn approximate_depth(&self, queue: &QueueHandle) -> Result<Option<u64>, BackendError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue.as_str())
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .send()
            .await
            .map_err(unavailable)?;

        let attributes = output.attributes();
        let count = |name: QueueAttributeName| {
            attributes
                .and_then(|a| a.get(&name))
                .map(String::as_str)
        };
        Ok(depth(
            count(QueueAttributeName::ApproximateNumberOfMessages),
            count(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
        ))
    }
}

/// Visible plus leased messages. `None` when SQS reported neither count.
fn depth(visible: Option<&str>, not_visible: Option<&str>) -> Option<u64> {
    let parse = |count: Option<&str>| count.and_then(|c| c.parse::<u64>().ok());
    match (parse(visible), parse(not_visible)) {
        (None, None) => None,
        (visible, not_visible) => Some(visible.unwrap_or(0) + not_visible.unwrap_or(0)),
    }
}

fn failure_reason(code: &str, message: Option<&str>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("{}: {}", code, message),
        _ => code.to_string(),
    }
}
