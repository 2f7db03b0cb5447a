//! JSON-line events on stdout for machine consumers.
//!
//! Off by default. When enabled, each notable step of a run is printed as a
//! single JSON object per line; human-oriented logs keep going to stderr.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable JSON output mode.
pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

/// Check if JSON mode is enabled.
pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

/// JSON event types that can be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    Prepared,
    TaskClaimed,
    TaskSkipped,
    TaskCompleted,
    TaskFailed,
    QueueDrained,
    Summary,
}

/// A JSON event to be output to stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    /// Create a new JSON event with the current timestamp.
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Output this event as a JSON line to stdout.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

pub fn emit_prepared(list_id: &str, total: usize, already_completed: usize, enqueued: usize) {
    JsonEvent::new(
        JsonEventType::Prepared,
        serde_json::json!({
            "list_id": list_id,
            "total": total,
            "already_completed": already_completed,
            "enqueued": enqueued,
        }),
    )
    .emit();
}

pub fn emit_task_claimed(worker_id: &str, task_id: &str, attempt: u32) {
    JsonEvent::new(
        JsonEventType::TaskClaimed,
        serde_json::json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "attempt": attempt,
        }),
    )
    .emit();
}

pub fn emit_task_skipped(worker_id: &str, task_id: &str) {
    JsonEvent::new(
        JsonEventType::TaskSkipped,
        serde_json::json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "reason": "already completed",
        }),
    )
    .emit();
}

pub fn emit_task_completed(worker_id: &str, task_id: &str, duration_secs: f64) {
    JsonEvent::new(
        JsonEventType::TaskCompleted,
        serde_json::json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "duration_secs": duration_secs,
        }),
    )
    .emit();
}

pub fn emit_task_failed(worker_id: &str, task_id: &str, duration_secs: f64, error: &str) {
    JsonEvent::new(
        JsonEventType::TaskFailed,
        serde_json::json!({
            "worker_id": worker_id,
            "task_id": task_id,
            "duration_secs": duration_secs,
            "error": error,
        }),
    )
    .emit();
}

pub fn emit_queue_drained(worker_id: &str, depth: Option<u64>) {
    JsonEvent::new(
        JsonEventType::QueueDrained,
        serde_json::json!({
            "worker_id": worker_id,
            "depth": depth,
        }),
    )
    .emit();
}

pub fn emit_summary(processed: u32, passed: u32, failed: u32, duration_secs: f64) {
    JsonEvent::new(
        JsonEventType::Summary,
        serde_json::json!({
            "processed": processed,
            "passed": passed,
            "failed": failed,
            "duration_secs": duration_secs,
        }),
    )
    .emit();
}
