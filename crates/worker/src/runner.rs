//! Task runner.
//!
//! Drives each task from Pending to a terminal state. Every execution owns
//! one tokio task, and the kind's work function runs in a child task so that
//! an expired cancellation grace can abort it. All state changes go through
//! the registry and are then announced to the status notifier and the event
//! bus.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pmdash_core::registry::SharedRegistry;
use pmdash_core::task::{
    FailureKind, Task, TaskError, TaskFailure, TaskId, TaskState, Transition,
};
use pmdash_core::task_events::event_for_snapshot;
use pmdash_events::{EventBus, PlatformEvent, StatusNotifier};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RunnerConfig;
use crate::kinds::{KindRegistry, KindSpec, WorkError};
use crate::progress::ProgressSink;

// ---------------------------------------------------------------------------
// Committer
// ---------------------------------------------------------------------------

/// Applies transitions with storage retries and announces what committed.
pub(crate) struct Committer {
    registry: SharedRegistry,
    notifier: Arc<StatusNotifier>,
    bus: Arc<EventBus>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl Committer {
    /// Apply `transition`, retrying storage errors with linear backoff.
    pub(crate) async fn commit(&self, id: TaskId, transition: Transition) -> Result<Task, TaskError> {
        let mut attempt = 0;
        loop {
            match self.registry.update(id, transition.clone()).await {
                Ok(snapshot) => {
                    self.announce(&snapshot);
                    return Ok(snapshot);
                }
                Err(TaskError::Storage(message)) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        task_id = %id,
                        attempt,
                        error = %message,
                        "Registry write failed, retrying",
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Last-ditch attempt to record that storage retries ran out.
    pub(crate) async fn fail_storage(&self, id: TaskId, message: &str) {
        tracing::error!(task_id = %id, error = message, "Storage retries exhausted, failing task");

        let failure = TaskFailure::new(FailureKind::StorageError, message);
        match self.registry.update(id, Transition::Fail(failure)).await {
            Ok(snapshot) => self.announce(&snapshot),
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "Could not record storage failure");
            }
        }
    }

    /// Offer a committed snapshot to the event bus and the notifier.
    pub(crate) fn announce(&self, snapshot: &Task) {
        self.bus
            .publish(PlatformEvent::for_task(event_for_snapshot(snapshot), snapshot));
        self.notifier.publish(snapshot);
    }
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to the runner.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SharedRegistry,
    committer: Arc<Committer>,
    kinds: Arc<KindRegistry>,
    config: RunnerConfig,
    /// Cancellation tokens of executions live in this process.
    executions: DashMap<TaskId, CancellationToken>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl TaskRunner {
    pub fn new(
        registry: SharedRegistry,
        notifier: Arc<StatusNotifier>,
        bus: Arc<EventBus>,
        kinds: Arc<KindRegistry>,
        config: RunnerConfig,
    ) -> Self {
        let committer = Arc::new(Committer {
            registry: registry.clone(),
            notifier,
            bus,
            retry_attempts: config.storage_retry_attempts,
            retry_backoff: config.storage_retry_backoff,
        });

        Self {
            inner: Arc::new(Inner {
                registry,
                committer,
                kinds,
                config,
                executions: DashMap::new(),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }

    pub fn kinds(&self) -> &Arc<KindRegistry> {
        &self.inner.kinds
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    /// Number of executions currently owned by this runner.
    pub fn active_count(&self) -> usize {
        self.inner.executions.len()
    }

    pub(crate) fn announce(&self, snapshot: &Task) {
        self.inner.committer.announce(snapshot);
    }

    /// Start `id` after the configured start delay.
    pub fn schedule(&self, id: TaskId) {
        let runner = self.clone();
        let delay = self.inner.config.start_delay;

        self.inner.tracker.spawn(async move {
            tokio::select! {
                _ = runner.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match runner.start(id).await {
                Ok(()) => {}
                Err(TaskError::InvalidTransition { from, .. }) => {
                    tracing::debug!(task_id = %id, state = %from, "Task no longer pending, not started");
                }
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "Failed to start task");
                }
            }
        });
    }

    /// Move a Pending task to Running and launch its work function.
    pub async fn start(&self, id: TaskId) -> Result<(), TaskError> {
        let token = self.inner.shutdown.child_token();
        let claimed = match self.inner.executions.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                true
            }
        };
        if !claimed {
            let current = self.inner.registry.get(id).await?;
            return Err(TaskError::InvalidTransition {
                id,
                from: current.state,
                action: Transition::Start.action(),
            });
        }

        let snapshot = match self.inner.committer.commit(id, Transition::Start).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.inner.executions.remove(&id);
                if let TaskError::Storage(message) = &e {
                    self.inner.committer.fail_storage(id, message).await;
                }
                return Err(e);
            }
        };

        let Some(spec) = self.inner.kinds.get(&snapshot.kind) else {
            self.inner.executions.remove(&id);
            let failure = TaskFailure::new(
                FailureKind::WorkFunctionError,
                format!("No work function registered for kind '{}'", snapshot.kind),
            );
            self.inner.finish(id, Transition::Fail(failure)).await;
            return Ok(());
        };

        tracing::info!(task_id = %id, kind = %snapshot.kind, owner = snapshot.owner, "Task started");

        let inner = Arc::clone(&self.inner);
        self.inner
            .tracker
            .spawn(inner.execute(id, spec, snapshot.payload, token));
        Ok(())
    }

    /// Request cancellation.
    ///
    /// A Pending task is cancelled at once. For a Running task the request
    /// is recorded and its work function signalled; the final state follows
    /// once the work function stops or its grace period runs out.
    pub async fn cancel(&self, id: TaskId) -> Result<Task, TaskError> {
        let snapshot = self.inner.committer.commit(id, Transition::Cancel).await?;
        if snapshot.state != TaskState::Running {
            return Ok(snapshot);
        }

        let token = self
            .inner
            .executions
            .get(&id)
            .map(|entry| entry.value().clone());
        match token {
            Some(token) => {
                tracing::info!(task_id = %id, "Cancellation requested");
                token.cancel();
                Ok(snapshot)
            }
            None => {
                match self.inner.committer.commit(id, Transition::ConfirmCancel).await {
                    Ok(snapshot) => {
                        tracing::warn!(task_id = %id, "No live execution for running task, cancelled directly");
                        Ok(snapshot)
                    }
                    // The execution settled between the two commits.
                    Err(TaskError::InvalidTransition { .. }) => self.inner.registry.get(id).await,
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Cancel every in-flight execution and wait for them to settle.
    ///
    /// Tasks still waiting out their start delay stay Pending. Every open
    /// snapshot stream is closed once the executions have drained.
    pub async fn shutdown(&self) {
        let ids: Vec<TaskId> = self
            .inner
            .executions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        tracing::info!(in_flight = ids.len(), "Shutting down task runner");

        for id in ids {
            if let Err(e) = self.cancel(id).await {
                tracing::debug!(task_id = %id, error = %e, "Cancel during shutdown skipped");
            }
        }
        self.inner.shutdown.cancel();
        self.inner.tracker.close();

        let drain = self.inner.config.cancel_grace * 2;
        if tokio::time::timeout(drain, self.inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.inner.tracker.len(),
                "Task runner did not drain before timeout",
            );
        }

        let closed = self.inner.committer.notifier.close_all();
        tracing::info!(closed, "Closed remaining snapshot streams");
    }
}

impl Inner {
    async fn execute(
        self: Arc<Self>,
        id: TaskId,
        spec: Arc<KindSpec>,
        payload: serde_json::Value,
        token: CancellationToken,
    ) {
        let grace = spec.cancel_grace.unwrap_or(self.config.cancel_grace);
        let sink = ProgressSink::new(id, Arc::clone(&self.committer));
        let work = Arc::clone(&spec.work);
        let work_token = token.clone();
        let mut handle = tokio::spawn(async move { work.run(payload, sink, work_token).await });

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = token.cancelled() => match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    handle.abort();
                    None
                }
            },
        };

        let transition = match joined {
            None => {
                tracing::warn!(
                    task_id = %id,
                    grace_ms = grace.as_millis() as u64,
                    "Work function ignored cancellation, aborted",
                );
                Transition::Fail(TaskFailure::new(
                    FailureKind::CancellationTimeout,
                    format!(
                        "Work function did not stop within {} ms of cancellation",
                        grace.as_millis()
                    ),
                ))
            }
            Some(_) if token.is_cancelled() => Transition::ConfirmCancel,
            Some(Ok(Ok(result))) => Transition::Complete(result),
            Some(Ok(Err(WorkError::Cancelled))) => Transition::ConfirmCancel,
            Some(Ok(Err(WorkError::Failed(message)))) => Transition::Fail(TaskFailure::new(
                FailureKind::WorkFunctionError,
                message,
            )),
            Some(Err(join_err)) => Transition::Fail(TaskFailure::new(
                FailureKind::WorkFunctionError,
                panic_message(join_err),
            )),
        };

        self.finish(id, transition).await;
        self.executions.remove(&id);
    }

    /// Commit a task's outcome.
    async fn finish(&self, id: TaskId, transition: Transition) {
        match self.committer.commit(id, transition).await {
            Ok(snapshot) => {
                tracing::info!(task_id = %id, state = %snapshot.state, "Task finished");
            }
            Err(TaskError::InvalidTransition { from, .. }) => {
                tracing::debug!(task_id = %id, state = %from, "Task already settled, outcome dropped");
            }
            Err(TaskError::Storage(message)) => {
                self.committer.fail_storage(id, &message).await;
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Failed to record task outcome");
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("Work function aborted: {err}");
    }

    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into());
    format!("Work function panicked: {detail}")
}
