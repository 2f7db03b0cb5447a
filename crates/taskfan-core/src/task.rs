//! Task and TaskList types.
//!
//! A [`TaskList`] is the parsed job file. Defaults are resolved by serde at
//! load time and [`TaskList::validate`] runs once at the boundary, so the
//! rest of the system can treat a `TaskList` as well-formed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CoreError, ListId, TaskId};

/// A unit of work. The `spec` bag is never interpreted by taskfan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier, unique within the list.
    pub id: TaskId,

    /// Human-readable label.
    #[serde(default)]
    pub display_name: String,

    /// Opaque parameters for the executor.
    #[serde(default)]
    pub spec: Map<String, Value>,
}

impl Task {
    /// Create a new Task with an empty spec.
    pub fn new(id: impl Into<TaskId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            spec: Map::new(),
        }
    }

    /// Builder method to add a spec entry.
    pub fn with_spec(mut self, key: impl Into<String>, value: Value) -> Self {
        self.spec.insert(key.into(), value);
        self
    }

    /// Label for logs: the display name, or the id when there is none.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.id.as_str()
        } else {
            &self.display_name
        }
    }

    /// Serialize as a queue message body.
    pub fn to_message_body(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Decode a queue message body.
    pub fn from_message_body(body: &str) -> Result<Self, CoreError> {
        let task: Task = serde_json::from_str(body)?;
        if task.id.is_empty() {
            return Err(CoreError::InvalidJobFile(
                "message carries a task with an empty id".to_string(),
            ));
        }
        Ok(task)
    }
}

/// An ordered list of tasks sharing one ledger partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    /// Unique per logical run; reuse it to resume a run.
    pub id: ListId,

    #[serde(default)]
    pub display_name: String,

    /// Tasks in enqueue order.
    pub tasks: Vec<Task>,
}

impl TaskList {
    /// Create an empty TaskList.
    pub fn new(id: impl Into<ListId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            tasks: Vec::new(),
        }
    }

    /// Builder method to append a task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Parse and validate a job document.
    pub fn parse(contents: &str) -> Result<Self, CoreError> {
        let list: TaskList = serde_json::from_str(contents)?;
        list.validate()?;
        Ok(list)
    }

    /// Check the rules serde cannot express.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidJobFile(
                "task list id must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.tasks.len());
        for (index, task) in self.tasks.iter().enumerate() {
            if task.id.is_empty() {
                return Err(CoreError::InvalidJobFile(format!(
                    "task at position {} has an empty id",
                    index
                )));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(CoreError::DuplicateTaskId(task.id.to_string()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
