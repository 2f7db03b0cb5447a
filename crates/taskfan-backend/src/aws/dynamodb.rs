//! [`StatusStore`] over Amazon DynamoDB.
//!
//! One item per `(TaskListId, TaskId)`. Every transition is a single
//! `UpdateItem`, so the attempt counter is bumped by the store itself with
//! `if_not_exists(AttemptCount, 0) + 1` and concurrent workers cannot lose an
//! increment.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValue,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use taskfan_core::{ListId, RecordKey, StatusRecord, TaskId, TaskStatus, WorkerId};

use super::unavailable;
use crate::store::{RecordUpdate, StatusStore, Transition};
use crate::{BackendError, Provisioned};

const LIST_ID: &str = "TaskListId";
const TASK_ID: &str = "TaskId";
const STATUS: &str = "Status";
const WORKER_ID: &str = "WorkerId";
const DISPLAY_NAME: &str = "TaskDisplayName";
const ATTEMPT_COUNT: &str = "AttemptCount";
const STARTED_AT: &str = "StartedAt";
const FINISHED_AT: &str = "FinishedAt";

/// Polls of `DescribeTable` while a new table is being created.
const ACTIVE_POLLS: u32 = 60;
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);

type Item = HashMap<String, AttributeValue>;

/// Ledger tables in DynamoDB, billed per request.
#[derive(Clone)]
pub struct DynamoStatusStore {
    client: Client,
}

impl DynamoStatusStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    async fn wait_until_active(&self, table: &str) -> Result<(), BackendError> {
        for _ in 0..ACTIVE_POLLS {
            let output = self
                .client
                .describe_table()
                .table_name(table)
                .send()
                .await
                .map_err(unavailable)?;
            let status = output.table().and_then(|t| t.table_status());
            if status == Some(&TableStatus::Active) {
                return Ok(());
            }
            debug!(table = %table, status = ?status, "Waiting for table to become active");
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
        Err(BackendError::Unavailable(format!(
            "table {} did not become active",
            table
        )))
    }
}

fn key_item(key: &RecordKey) -> Item {
    HashMap::from([
        (LIST_ID.to_string(), AttributeValue::S(key.list_id.to_string())),
        (TASK_ID.to_string(), AttributeValue::S(key.task_id.to_string())),
    ])
}

fn timestamp(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// The pieces of one `UpdateItem` call.
#[derive(Debug, PartialEq)]
struct UpdateRequest {
    expression: String,
    names: HashMap<String, String>,
    values: Item,
}

fn update_request(update: &RecordUpdate) -> UpdateRequest {
    let mut names = HashMap::from([
        ("#status".to_string(), STATUS.to_string()),
        ("#workerId".to_string(), WORKER_ID.to_string()),
        ("#taskDisplayName".to_string(), DISPLAY_NAME.to_string()),
    ]);
    let mut values = HashMap::from([
        (":status".to_string(), AttributeValue::S(update.status.to_string())),
        (":workerId".to_string(), AttributeValue::S(update.worker_id.to_string())),
        (
            ":taskDisplayName".to_string(),
            AttributeValue::S(update.task_display_name.clone()),
        ),
    ]);
    let mut set = vec![
        "#status = :status",
        "#workerId = :workerId",
        "#taskDisplayName = :taskDisplayName",
    ];
    let mut remove = None;

    match update.transition {
        Transition::Started(at) => {
            names.insert("#startedAt".to_string(), STARTED_AT.to_string());
            names.insert("#finishedAt".to_string(), FINISHED_AT.to_string());
            values.insert(":timestamp".to_string(), timestamp(at));
            set.push("#startedAt = :timestamp");
            remove = Some("#finishedAt");
        }
        Transition::Finished(at) => {
            names.insert("#finishedAt".to_string(), FINISHED_AT.to_string());
            values.insert(":timestamp".to_string(), timestamp(at));
            set.push("#finishedAt = :timestamp");
        }
    }

    if update.increment_attempt_count {
        names.insert("#attemptCount".to_string(), ATTEMPT_COUNT.to_string());
        values.insert(":zero".to_string(), AttributeValue::N("0".to_string()));
        values.insert(":inc".to_string(), AttributeValue::N("1".to_string()));
        set.push("#attemptCount = if_not_exists(#attemptCount, :zero) + :inc");
    }

    let mut expression = format!("SET {}", set.join(", "));
    if let Some(attribute) = remove {
        expression.push_str(" REMOVE ");
        expression.push_str(attribute);
    }
    UpdateRequest {
        expression,
        names,
        values,
    }
}

fn string_attribute<'a>(item: &'a Item, name: &str) -> Result<Option<&'a str>, BackendError> {
    match item.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_s()
            .map(|s| Some(s.as_str()))
            .map_err(|_| BackendError::MalformedRecord(format!("{} is not a string", name))),
    }
}

fn time_attribute(item: &Item, name: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
    string_attribute(item, name)?
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| BackendError::MalformedRecord(format!("{} {:?}: {}", name, s, e)))
        })
        .transpose()
}

/// Decode one stored item.
fn record_from_item(item: &Item) -> Result<StatusRecord, BackendError> {
    let task_id = string_attribute(item, TASK_ID)?
        .ok_or_else(|| BackendError::MalformedRecord(format!("item without {}", TASK_ID)))?;

    let status = match string_attribute(item, STATUS)? {
        Some(status) => status
            .parse::<TaskStatus>()
            .map_err(|e| BackendError::MalformedRecord(e.to_string()))?,
        None => TaskStatus::Pending,
    };

    let attempt_count = match item.get(ATTEMPT_COUNT) {
        None => 0,
        Some(value) => value
            .as_n()
            .ok()
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| {
                BackendError::MalformedRecord(format!("{} is not a count", ATTEMPT_COUNT))
            })?,
    };

    Ok(StatusRecord {
        task_id: TaskId::new(task_id),
        worker_id: string_attribute(item, WORKER_ID)?.map(WorkerId::new),
        attempt_count,
        started_at: time_attribute(item, STARTED_AT)?,
        finished_at: time_attribute(item, FINISHED_AT)?,
        status,
        task_display_name: string_attribute(item, DISPLAY_NAME)?
            .unwrap_or_default()
            .to_string(),
    })
}

#[async_trait]
impl StatusStore for DynamoStatusStore {
    async fn create_table(&self, table: &str) -> Result<Provisioned, BackendError> {
        let definition = |name: &str| {
            AttributeDefinition::builder()
                .attribute_name(name)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(|e| BackendError::InvalidRequest(e.to_string()))
        };
        let key = |name: &str, key_type: KeyType| {
            KeySchemaElement::builder()
                .attribute_name(name)
                .key_type(key_type)
                .build()
                .map_err(|e| BackendError::InvalidRequest(e.to_string()))
        };

        let created = self
            .client
            .create_table()
            .table_name(table)
            .attribute_definitions(definition(LIST_ID)?)
            .attribute_definitions(definition(TASK_ID)?)
            .key_schema(key(LIST_ID, KeyType::Hash)?)
            .key_schema(key(TASK_ID, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match created {
            Ok(_) => {
                info!(table = %table, "Created DynamoDB table");
                self.wait_until_active(table).await?;
                Ok(Provisioned::Created)
            }
            Err(e) if e.as_service_error().is_some_and(|e| e.is_resource_in_use_exception()) => {
                Ok(Provisioned::AlreadyExists)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn upsert(
        &self,
        table: &str,
        key: &RecordKey,
        update: RecordUpdate,
    ) -> Result<StatusRecord, BackendError> {
        let request = update_request(&update);
        let output = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(key_item(key)))
            .update_expression(request.expression)
            .set_expression_attribute_names(Some(request.names))
            .set_expression_attribute_values(Some(request.values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) {
                    BackendError::TableNotFound(table.to_string())
                } else {
                    unavailable(e)
                }
            })?;

        let item = output.attributes().ok_or_else(|| {
            BackendError::Unavailable(format!("update of {} returned no item", key.task_id))
        })?;
        record_from_item(item)
    }

    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<StatusRecord>, BackendError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key_item(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) {
                    BackendError::TableNotFound(table.to_string())
                } else {
                    unavailable(e)
                }
            })?;

        output.item().map(record_from_item).transpose()
    }

    async fn query(&self, table: &str, list_id: &ListId) -> Result<Vec<StatusRecord>, BackendError> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .query()
                .table_name(table)
                .key_condition_expression("#listId = :listId")
                .expression_attribute_names("#listId", LIST_ID)
                .expression_attribute_values(":listId", AttributeValue::S(list_id.to_string()))
                .set_exclusive_start_key(start_key.take())
                .consistent_read(true)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(|e| e.is_resource_not_found_exception()) {
                        BackendError::TableNotFound(table.to_string())
                    } else {
                        unavailable(e)
                    }
                })?;

            for item in output.items() {
                records.push(record_from_item(item)?);
            }
            match output.last_evaluated_key() {
                Some(last) if !last.is_empty() => start_key = Some(last.clone()),
                _ => break,
            }
        }
        Ok(records)
    }
}
