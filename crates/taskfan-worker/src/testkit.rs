//! Test doubles shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use taskfan_backend::{
    BackendError, BatchEntryFailure, BatchSendResult, MemoryQueue, MemoryStatusStore,
    OutgoingMessage, Provisioned, QueueHandle, QueueService, QueueStats, ReceiptHandle,
    ReceivedMessage, RecordUpdate, StatusStore, Transition,
};
use taskfan_core::{ListId, RecordKey, StatusRecord, Task, TaskId, TaskList, WorkerId};

use crate::executor::{ExecutorError, RunOutcome, TaskRunner};
use crate::worker::{WorkerLoop, WorkerSettings};
use crate::{StatusLedger, TaskQueue};

pub const LIST_ID: &str = "run-1";
pub const QUEUE_NAME: &str = "taskfan_run-1";
pub const TABLE: &str = "taskfan";

/// A [`MemoryQueue`] with injectable faults.
#[derive(Default)]
pub struct FlakyQueue {
    inner: Arc<MemoryQueue>,
    fail_extensions: bool,
    failing_deletes: AtomicUsize,
    rejected_entry: Option<String>,
    unavailable: AtomicBool,
    send_delay: Option<Duration>,
    extension_attempts: AtomicUsize,
    send_attempts: AtomicUsize,
    sends_in_flight: AtomicUsize,
    max_sends_in_flight: AtomicUsize,
}

impl FlakyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lease extension fails.
    pub fn failing_extensions(mut self) -> Self {
        self.fail_extensions = true;
        self
    }

    /// The next `count` deletes fail.
    pub fn failing_first_deletes(self, count: usize) -> Self {
        self.failing_deletes.store(count, Ordering::SeqCst);
        self
    }

    /// Batches containing `entry_id` report that entry as failed.
    pub fn rejecting_entry(mut self, entry_id: &str) -> Self {
        self.rejected_entry = Some(entry_id.to_string());
        self
    }

    /// Every send takes `delay` before reaching the queue.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Make every call fail as if the service were down.
    pub fn go_down(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn memory(&self) -> Arc<MemoryQueue> {
        self.inner.clone()
    }

    pub fn extension_attempts(&self) -> usize {
        self.extension_attempts.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn max_sends_in_flight(&self) -> usize {
        self.max_sends_in_flight.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("queue service is down".to_string()));
        }
        Ok(())
    }

    async fn forward_batch(
        &self,
        queue: &QueueHandle,
        entries: Vec<OutgoingMessage>,
    ) -> Result<BatchSendResult, BackendError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;

        let Some(rejected) = &self.rejected_entry else {
            return self.inner.send_batch(queue, entries).await;
        };
        let (failed, accepted): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| &e.entry_id == rejected);

        let mut result = if accepted.is_empty() {
            BatchSendResult::default()
        } else {
            self.inner.send_batch(queue, accepted).await?
        };
        result.failed.extend(failed.into_iter().map(|e| BatchEntryFailure {
            entry_id: e.entry_id,
            reason: "rejected for test".to_string(),
        }));
        Ok(result)
    }
}

#[async_trait]
impl QueueService for FlakyQueue {
    async fn create_queue(&self, name: &str) -> Result<(QueueHandle, Provisioned), BackendError> {
        self.check_available()?;
        self.inner.create_queue(name).await
    }

    async fn lookup_queue(&self, name: &str) -> Result<QueueHandle, BackendError> {
        self.check_available()?;
        self.inner.lookup_queue(name).await
    }

    async fn send_batch(
        &self,
        queue: &QueueHandle,
        entries: Vec<OutgoingMessage>,
    ) -> Result<BatchSendResult, BackendError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.sends_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_sends_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.forward_batch(queue, entries).await;

        self.sends_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn receive(
        &self,
        queue: &QueueHandle,
        max_messages: usize,
        lease: Duration,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        self.check_available()?;
        self.inner.receive(queue, max_messages, lease).await
    }

    async fn extend_lease(
        &self,
        queue: &QueueHandle,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), BackendError> {
        self.extension_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_extensions {
            return Err(BackendError::Unavailable("extension refused".to_string()));
        }
        self.inner.extend_lease(queue, receipt, lease).await
    }

    async fn delete(&self, queue: &QueueHandle, receipt: &ReceiptHandle) -> Result<(), BackendError> {
        let remaining = self.failing_deletes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_deletes.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("delete refused".to_string()));
        }
        self.inner.delete(queue, receipt).await
    }

    async fn approximate_depth(&self, queue: &QueueHandle) -> Result<Option<u64>, BackendError> {
        self.check_available()?;
        self.inner.approximate_depth(queue).await
    }
}

/// A [`MemoryStatusStore`] whose reads and writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStatusStore,
    fail_gets: AtomicBool,
    fail_started: AtomicBool,
    fail_finished: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookups fail from now on.
    pub fn fail_gets(&self) {
        self.fail_gets.store(true, Ordering::SeqCst);
    }

    /// Upserts that start an attempt fail from now on.
    pub fn fail_started_writes(&self) {
        self.fail_started.store(true, Ordering::SeqCst);
    }

    /// Upserts that finish an attempt fail from now on.
    pub fn fail_finished_writes(&self) {
        self.fail_finished.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusStore for FlakyStore {
    async fn create_table(&self, table: &str) -> Result<Provisioned, BackendError> {
        self.inner.create_table(table).await
    }

    async fn upsert(
        &self,
        table: &str,
        key: &RecordKey,
        update: RecordUpdate,
    ) -> Result<StatusRecord, BackendError> {
        let refused = match update.transition {
            Transition::Started(_) => &self.fail_started,
            Transition::Finished(_) => &self.fail_finished,
        };
        if refused.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("write refused".to_string()));
        }
        self.inner.upsert(table, key, update).await
    }

    async fn get(&self, table: &str, key: &RecordKey) -> Result<Option<StatusRecord>, BackendError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("read refused".to_string()));
        }
        self.inner.get(table, key).await
    }

    async fn query(&self, table: &str, list_id: &ListId) -> Result<Vec<StatusRecord>, BackendError> {
        self.inner.query(table, list_id).await
    }
}

enum Script {
    Exit(i32),
    LaunchError,
}

/// A [`TaskRunner`] whose outcomes are set per task id. Unscripted tasks succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    outcomes: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    invocations: Mutex<Vec<TaskId>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_code(mut self, task_id: &str, code: i32) -> Self {
        self.outcomes.insert(task_id.to_string(), Script::Exit(code));
        self
    }

    pub fn launch_error(mut self, task_id: &str) -> Self {
        self.outcomes.insert(task_id.to_string(), Script::LaunchError);
        self
    }

    pub fn delay(mut self, task_id: &str, delay: Duration) -> Self {
        self.delays.insert(task_id.to_string(), delay);
        self
    }

    /// Task ids in the order they were run.
    pub fn invocations(&self) -> Vec<TaskId> {
        self.invocations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, _list_id: &ListId, task: &Task) -> Result<RunOutcome, ExecutorError> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(task.id.clone());
        }
        if let Some(delay) = self.delays.get(task.id.as_str()) {
            tokio::time::sleep(*delay).await;
        }

        match self.outcomes.get(task.id.as_str()) {
            None => Ok(RunOutcome::Succeeded),
            Some(Script::Exit(0)) => Ok(RunOutcome::Succeeded),
            Some(Script::Exit(code)) => Ok(RunOutcome::Failed {
                exit_code: Some(*code),
            }),
            Some(Script::LaunchError) => Err(ExecutorError::Spawn {
                program: "scripted".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            }),
        }
    }
}

/// A list, its queue and its ledger, wired over in-memory backends.
pub struct Fixture {
    pub list: TaskList,
    pub memory: Arc<MemoryQueue>,
    pub queue: TaskQueue,
    pub ledger: StatusLedger,
}

impl Fixture {
    pub async fn with_tasks(ids: &[&str]) -> Self {
        let memory = Arc::new(MemoryQueue::new());
        Self::build(ids, memory.clone(), memory, Arc::new(MemoryStatusStore::new())).await
    }

    pub async fn flaky(ids: &[&str], configure: impl FnOnce(FlakyQueue) -> FlakyQueue) -> Self {
        let flaky = configure(FlakyQueue::new());
        let memory = flaky.memory();
        Self::build(ids, Arc::new(flaky), memory, Arc::new(MemoryStatusStore::new())).await
    }

    /// Wire the list over a faulty queue and a faulty store the caller keeps.
    pub async fn with_faults(ids: &[&str], queue: Arc<FlakyQueue>, store: Arc<FlakyStore>) -> Self {
        let memory = queue.memory();
        Self::build(ids, queue, memory, store).await
    }

    async fn build(
        ids: &[&str],
        service: Arc<dyn QueueService>,
        memory: Arc<MemoryQueue>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        let list = task_list(ids);
        let (queue, _) = TaskQueue::ensure(service, QUEUE_NAME).await.unwrap();
        let ledger = StatusLedger::new(store, TABLE);
        ledger.ensure_table().await.unwrap();

        Self {
            list,
            memory,
            queue,
            ledger,
        }
    }

    pub fn list_id(&self) -> ListId {
        self.list.id.clone()
    }

    /// Put every task of the list on the queue.
    pub async fn enqueue_all(&self) {
        for chunk in self.list.tasks.chunks(10) {
            let result = self.queue.send_tasks(chunk).await.unwrap();
            assert!(result.all_succeeded());
        }
    }

    /// Put a message with an arbitrary body on the queue.
    pub async fn enqueue_raw(&self, body: &str) {
        let handle = self.memory.lookup_queue(QUEUE_NAME).await.unwrap();
        self.memory
            .send_batch(
                &handle,
                vec![OutgoingMessage {
                    entry_id: "raw".to_string(),
                    body: body.to_string(),
                }],
            )
            .await
            .unwrap();
    }

    /// Record a task as already completed by an earlier run.
    pub async fn complete(&self, id: &str) {
        let task = self.task(id);
        let worker = WorkerId::new("earlier-run");
        self.ledger
            .mark_running(&self.list.id, &task, &worker)
            .await
            .unwrap();
        self.ledger
            .mark_completed(&self.list.id, &task, &worker)
            .await
            .unwrap();
    }

    /// Record a task as RUNNING, as a worker that crashed would leave it.
    pub async fn start(&self, id: &str) {
        let task = self.task(id);
        self.ledger
            .mark_running(&self.list.id, &task, &WorkerId::new("crashed"))
            .await
            .unwrap();
    }

    pub fn task(&self, id: &str) -> Task {
        self.list
            .tasks
            .iter()
            .find(|t| t.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| Task::new(id, id))
    }

    pub fn worker(&self, runner: Arc<ScriptedRunner>, worker_id: &str) -> WorkerLoop {
        WorkerLoop::new(
            self.queue.clone(),
            self.ledger.clone(),
            runner,
            self.list.id.clone(),
            WorkerId::new(worker_id),
            WorkerSettings {
                lease: Duration::from_secs(30),
                poll_interval: Duration::from_secs(1),
            },
        )
    }

    pub async fn record(&self, id: &str) -> Option<StatusRecord> {
        self.records()
            .await
            .into_iter()
            .find(|r| r.task_id.as_str() == id)
    }

    pub async fn records(&self) -> Vec<StatusRecord> {
        self.ledger.records(&self.list.id).await.unwrap()
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.memory.stats(QUEUE_NAME).await.unwrap()
    }
}

/// A list `run-1` with one task per id, display names in upper case.
pub fn task_list(ids: &[&str]) -> TaskList {
    ids.iter().fold(TaskList::new(LIST_ID, "Test run"), |list, id| {
        list.with_task(Task::new(*id, &id.to_uppercase()))
    })
}
