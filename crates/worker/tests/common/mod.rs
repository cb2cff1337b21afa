//! Shared fixtures for runner and gateway tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use pmdash_core::registry::{InMemoryTaskRegistry, SharedRegistry, TaskFilter, TaskRegistry};
use pmdash_core::task::{Task, TaskError, TaskId, Transition};
use pmdash_events::{EventBus, StatusNotifier};
use pmdash_worker::{
    AgentSimConfig, KindRegistry, KindSpec, ProgressSink, RunnerConfig, SubmissionGateway,
    TaskKindInfo, TaskRunner, WorkError, WorkFunction,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const GRACE: Duration = Duration::from_millis(100);

pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        start_delay: Duration::ZERO,
        cancel_grace: GRACE,
        storage_retry_attempts: 3,
        storage_retry_backoff: Duration::from_millis(1),
        max_payload_bytes: 1024,
    }
}

pub fn fast_agents() -> AgentSimConfig {
    AgentSimConfig {
        tick_min: Duration::from_millis(1),
        tick_max: Duration::from_millis(3),
    }
}

// ---------------------------------------------------------------------------
// Work functions
// ---------------------------------------------------------------------------

/// Reports 50 and returns its payload.
pub struct Echo;

#[async_trait]
impl WorkFunction for Echo {
    async fn run(&self, payload: Value, progress: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        progress
            .report(50)
            .await
            .map_err(|e| WorkError::Failed(e.to_string()))?;
        Ok(payload)
    }
}

pub struct Fails;

#[async_trait]
impl WorkFunction for Fails {
    async fn run(&self, _: Value, _: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        Err(WorkError::Failed("boom".into()))
    }
}

pub struct Panics;

#[async_trait]
impl WorkFunction for Panics {
    async fn run(&self, _: Value, _: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        panic!("kaboom");
    }
}

/// Reports 10, then waits for cancellation.
pub struct Patient;

#[async_trait]
impl WorkFunction for Patient {
    async fn run(&self, _: Value, progress: ProgressSink, cancel: CancellationToken) -> Result<Value, WorkError> {
        progress
            .report(10)
            .await
            .map_err(|e| WorkError::Failed(e.to_string()))?;
        cancel.cancelled().await;
        Err(WorkError::Cancelled)
    }
}

/// Never looks at its cancellation token.
pub struct Stubborn;

#[async_trait]
impl WorkFunction for Stubborn {
    async fn run(&self, _: Value, _: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    }
}

/// Reports 40 then 30, returning the outcome of the second report.
pub struct Regresses;

#[async_trait]
impl WorkFunction for Regresses {
    async fn run(&self, _: Value, progress: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        progress
            .report(40)
            .await
            .map_err(|e| WorkError::Failed(e.to_string()))?;
        let second = progress.report(30).await;
        Ok(json!({ "second": second.err().map(|e| e.to_string()) }))
    }
}

/// Races reports of 40 and 30, then fails so the final snapshot keeps the
/// progress. The failure message counts the rejected reports.
pub struct Races;

#[async_trait]
impl WorkFunction for Races {
    async fn run(&self, _: Value, progress: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        let (high, low) = tokio::join!(progress.report(40), progress.report(30));
        let rejected = [high, low]
            .into_iter()
            .filter(|outcome| matches!(outcome, Err(TaskError::InvalidProgress { .. })))
            .count();
        Err(WorkError::Failed(format!("rejected={rejected}")))
    }
}

/// Returns shortly after starting without checking its cancellation token.
pub struct Brief;

#[async_trait]
impl WorkFunction for Brief {
    async fn run(&self, _: Value, _: ProgressSink, _: CancellationToken) -> Result<Value, WorkError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(json!({"done": true}))
    }
}

fn info(id: &str) -> TaskKindInfo {
    TaskKindInfo {
        id: id.into(),
        name: id.into(),
        description: format!("test kind {id}"),
        icon: "box".into(),
        color: "gray".into(),
    }
}

/// Test kinds plus the simulated agents at test speed.
pub fn test_kinds() -> KindRegistry {
    let mut kinds = KindRegistry::with_agents(fast_agents());
    kinds.register(KindSpec::new(info("echo"), Arc::new(Echo)));
    kinds.register(KindSpec::new(info("fails"), Arc::new(Fails)));
    kinds.register(KindSpec::new(info("panics"), Arc::new(Panics)));
    kinds.register(KindSpec::new(info("patient"), Arc::new(Patient)));
    kinds.register(KindSpec::new(info("stubborn"), Arc::new(Stubborn)));
    kinds.register(KindSpec::new(info("regresses"), Arc::new(Regresses)));
    kinds.register(KindSpec::new(info("brief"), Arc::new(Brief)));
    kinds.register(KindSpec::new(info("races"), Arc::new(Races)));
    kinds
}

// ---------------------------------------------------------------------------
// Flaky registry
// ---------------------------------------------------------------------------

/// In-memory registry that fails selected updates with a storage error.
#[derive(Default)]
pub struct FlakyRegistry {
    inner: InMemoryTaskRegistry,
    failures_left: AtomicU32,
    fail_progress: bool,
    cancel_ack_delay: Option<Duration>,
}

impl FlakyRegistry {
    /// Fail the next `n` updates of any kind.
    pub fn failing_next(n: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(n),
            ..Default::default()
        }
    }

    /// Commit cancel requests at once but acknowledge them after `delay`.
    pub fn slow_cancel_ack(delay: Duration) -> Self {
        Self {
            cancel_ack_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Fail every progress update.
    pub fn failing_progress() -> Self {
        Self {
            fail_progress: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TaskRegistry for FlakyRegistry {
    async fn create(&self, task: Task) -> Result<(), TaskError> {
        self.inner.create(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, TaskError> {
        if self.fail_progress && matches!(transition, Transition::Progress(_)) {
            return Err(TaskError::Storage("disk unavailable".into()));
        }
        let pending_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(TaskError::Storage("connection reset".into()));
        }
        let is_cancel = matches!(transition, Transition::Cancel);
        let snapshot = self.inner.update(id, transition).await?;
        if let (true, Some(delay)) = (is_cancel, self.cancel_ack_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        self.inner.list(filter).await
    }

    async fn purge(&self, id: TaskId) -> Result<(), TaskError> {
        self.inner.purge(id).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub registry: SharedRegistry,
    pub notifier: Arc<StatusNotifier>,
    pub bus: Arc<EventBus>,
    pub runner: TaskRunner,
    pub gateway: SubmissionGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Arc::new(InMemoryTaskRegistry::new()), test_config())
    }

    pub fn with(registry: SharedRegistry, config: RunnerConfig) -> Self {
        let notifier = Arc::new(StatusNotifier::new(registry.clone()));
        let bus = Arc::new(EventBus::default());
        let runner = TaskRunner::new(
            registry.clone(),
            notifier.clone(),
            bus.clone(),
            Arc::new(test_kinds()),
            config,
        );
        let gateway = SubmissionGateway::new(runner.clone());

        Self {
            registry,
            notifier,
            bus,
            runner,
            gateway,
        }
    }

    pub async fn submit(&self, kind: &str, payload: Value) -> TaskId {
        self.gateway
            .submit(pmdash_worker::NewTask {
                kind: kind.into(),
                payload,
                owner: 1,
                project_id: None,
            })
            .await
            .expect("submit should succeed")
    }

    /// Follow `id` until it is terminal and return the final snapshot.
    pub async fn wait_terminal(&self, id: TaskId) -> Task {
        let stream = self.notifier.subscribe(id).await.expect("task should exist");
        let snapshots: Vec<Task> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .expect("task should settle within 5s");
        snapshots.into_iter().last().expect("stream yields at least one snapshot")
    }

    /// Wait until `id` is Running.
    pub async fn wait_running(&self, id: TaskId) -> Task {
        let mut stream = self.notifier.subscribe(id).await.expect("task should exist");
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(snapshot) = stream.next().await {
                if snapshot.state == pmdash_core::task::TaskState::Running {
                    return snapshot;
                }
            }
            panic!("stream ended before the task was running");
        })
        .await
        .expect("task should start within 5s")
    }
}
