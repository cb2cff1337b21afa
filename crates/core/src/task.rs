//! Task data model and state machine.
//!
//! A [`Task`] moves through the following states:
//!
//! ```text
//! Pending --start--> Running --progress(n)--> Running   (n monotonic, 0..=100)
//! Running --complete(result)--> Completed
//! Running --fail(error)--> Failed
//! Pending|Running --cancel--> Cancelled
//! ```
//!
//! Every mutation goes through [`Task::apply`], which validates the requested
//! [`Transition`] before touching any field. A rejected transition leaves the
//! task exactly as it was.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DbId, Timestamp};

/// Highest progress value a task can report.
pub const MAX_PROGRESS: u8 = 100;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Opaque task identifier.
///
/// Backed by a UUIDv7 so ids are unique without coordination and sort by
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Allocate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Completed, Failed, and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name, used for the database column and query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown task state '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Cause recorded in a failed task's `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work function returned an error or panicked.
    WorkFunctionError,
    /// The work function ignored a cancellation request past its grace period.
    CancellationTimeout,
    /// The registry kept rejecting writes after the runner's retries.
    StorageError,
}

/// Asynchronous error surfaced through a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Synchronous errors raised by the gateway, registry, and runner.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Unknown task kind '{0}'")]
    InvalidKind(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Cannot {action} task {id} in state {from}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        action: &'static str,
    },

    #[error("Rejected progress {requested} for task {id} (current {current})")]
    InvalidProgress {
        id: TaskId,
        current: u8,
        requested: u8,
    },

    /// Identifier allocation handed out an id that already exists. This is
    /// an invariant violation and is never retried.
    #[error("Task {0} already exists")]
    DuplicateId(TaskId),

    /// Transient storage failure; callers of `update` may retry.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TaskError {
    pub fn not_found(id: TaskId) -> Self {
        Self::NotFound(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A requested state change, applied atomically by a registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Pending -> Running.
    Start,
    /// Running -> Running with a new progress value.
    Progress(u8),
    /// Running -> Completed.
    Complete(serde_json::Value),
    /// Running -> Failed.
    Fail(TaskFailure),
    /// Pending -> Cancelled, or flag a Running task for cooperative stop.
    Cancel,
    /// Running -> Cancelled once the work function has stopped.
    ConfirmCancel,
}

impl Transition {
    /// Verb used in [`TaskError::InvalidTransition`] messages.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress(_) => "report progress on",
            Self::Complete(_) => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel => "cancel",
            Self::ConfirmCancel => "confirm cancellation of",
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Authoritative record of one submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub state: TaskState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Submitting principal.
    pub owner: DbId,
    pub project_id: Option<DbId>,
    /// Incremented on every committed change; orders snapshots.
    pub revision: i64,
    pub cancel_requested_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Immutable copy of a task delivered to observers.
pub type TaskSnapshot = Task;

impl Task {
    /// Build a fresh Pending task with zero progress.
    pub fn new(
        id: TaskId,
        kind: impl Into<String>,
        payload: serde_json::Value,
        owner: DbId,
        project_id: Option<DbId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            kind: kind.into(),
            payload,
            state: TaskState::Pending,
            progress: 0,
            result: None,
            error: None,
            owner,
            project_id,
            revision: 0,
            cancel_requested_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply `transition` at time `now`.
    ///
    /// Returns `Ok(true)` when the task changed, `Ok(false)` for an accepted
    /// no-op (repeated cancel request, unchanged progress). On error the task
    /// is left untouched.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<bool, TaskError> {
        if self.state.is_terminal() {
            return Err(self.invalid(&transition));
        }

        match (self.state, transition) {
            (TaskState::Pending, Transition::Start) => {
                self.state = TaskState::Running;
                self.started_at = Some(now);
            }
            (TaskState::Running, Transition::Progress(n)) => {
                if n > MAX_PROGRESS || n < self.progress {
                    return Err(TaskError::InvalidProgress {
                        id: self.id,
                        current: self.progress,
                        requested: n,
                    });
                }
                if n == self.progress {
                    return Ok(false);
                }
                self.progress = n;
            }
            // Once cancellation is requested, a work function that returns
            // before noticing it still ends the task Cancelled.
            (TaskState::Running, Transition::Complete(_)) if self.cancel_requested_at.is_some() => {
                self.state = TaskState::Cancelled;
                self.completed_at = Some(now);
            }
            (TaskState::Running, Transition::Fail(failure))
                if self.cancel_requested_at.is_some()
                    && failure.kind == FailureKind::WorkFunctionError =>
            {
                self.state = TaskState::Cancelled;
                self.completed_at = Some(now);
            }
            (TaskState::Running, Transition::Complete(result)) => {
                self.state = TaskState::Completed;
                self.progress = MAX_PROGRESS;
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            (TaskState::Running, Transition::Fail(failure)) => {
                self.state = TaskState::Failed;
                self.error = Some(failure);
                self.completed_at = Some(now);
            }
            (TaskState::Pending, Transition::Fail(failure))
                if failure.kind == FailureKind::StorageError =>
            {
                self.state = TaskState::Failed;
                self.error = Some(failure);
                self.completed_at = Some(now);
            }
            (TaskState::Pending, Transition::Cancel) => {
                self.state = TaskState::Cancelled;
                self.completed_at = Some(now);
            }
            (TaskState::Running, Transition::Cancel) => {
                if self.cancel_requested_at.is_some() {
                    return Ok(false);
                }
                self.cancel_requested_at = Some(now);
            }
            (TaskState::Running, Transition::ConfirmCancel) => {
                self.state = TaskState::Cancelled;
                self.completed_at = Some(now);
            }
            (_, other) => return Err(self.invalid(&other)),
        }

        self.revision += 1;
        self.updated_at = now;
        Ok(true)
    }

    fn invalid(&self, transition: &Transition) -> TaskError {
        TaskError::InvalidTransition {
            id: self.id,
            from: self.state,
            action: transition.action(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn now() -> Timestamp {
        chrono::Utc::now()
    }

    fn pending() -> Task {
        Task::new(TaskId::new(), "context-agent", json!({"task": "x"}), 1, None, now())
    }

    fn running() -> Task {
        let mut task = pending();
        task.apply(Transition::Start, now()).unwrap();
        task
    }

    #[test]
    fn new_task_is_pending_with_zero_progress() {
        let task = pending();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.progress, 0);
        assert_eq!(task.revision, 0);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn start_moves_pending_to_running() {
        let task = running();
        assert_eq!(task.state, TaskState::Running);
        assert!(task.started_at.is_some());
        assert_eq!(task.revision, 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut task = running();
        let err = task.apply(Transition::Start, now()).unwrap_err();
        assert_matches!(
            err,
            TaskError::InvalidTransition { from: TaskState::Running, action: "start", .. }
        );
    }

    #[test]
    fn progress_is_monotonic() {
        let mut task = running();
        assert!(task.apply(Transition::Progress(40), now()).unwrap());

        let err = task.apply(Transition::Progress(30), now()).unwrap_err();
        assert_matches!(err, TaskError::InvalidProgress { current: 40, requested: 30, .. });
        assert_eq!(task.progress, 40);
    }

    #[test]
    fn progress_above_100_is_rejected() {
        let mut task = running();
        let err = task.apply(Transition::Progress(101), now()).unwrap_err();
        assert_matches!(err, TaskError::InvalidProgress { requested: 101, .. });
        assert_eq!(task.progress, 0);
    }

    #[test]
    fn equal_progress_is_a_noop() {
        let mut task = running();
        task.apply(Transition::Progress(10), now()).unwrap();
        let revision = task.revision;

        assert!(!task.apply(Transition::Progress(10), now()).unwrap());
        assert_eq!(task.revision, revision);
    }

    #[test]
    fn progress_on_pending_task_is_rejected() {
        let mut task = pending();
        assert_matches!(
            task.apply(Transition::Progress(5), now()),
            Err(TaskError::InvalidTransition { from: TaskState::Pending, .. })
        );
    }

    #[test]
    fn complete_sets_result_and_full_progress() {
        let mut task = running();
        task.apply(Transition::Complete(json!({"ok": true})), now())
            .unwrap();

        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.progress, MAX_PROGRESS);
        assert_eq!(task.result, Some(json!({"ok": true})));
        assert!(task.error.is_none());
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn fail_sets_error_only() {
        let mut task = running();
        task.apply(Transition::Progress(35), now()).unwrap();
        let failure = TaskFailure::new(FailureKind::WorkFunctionError, "boom");
        task.apply(Transition::Fail(failure.clone()), now()).unwrap();

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error, Some(failure));
        assert!(task.result.is_none());
        assert_eq!(task.progress, 35, "progress freezes at failure");
    }

    #[test]
    fn terminal_task_rejects_every_transition() {
        let mut task = running();
        task.apply(Transition::Complete(json!(1)), now()).unwrap();
        let before = task.clone();

        for transition in [
            Transition::Start,
            Transition::Progress(100),
            Transition::Complete(json!(2)),
            Transition::Fail(TaskFailure::new(FailureKind::StorageError, "x")),
            Transition::Cancel,
            Transition::ConfirmCancel,
        ] {
            assert_matches!(
                task.apply(transition, now()),
                Err(TaskError::InvalidTransition { from: TaskState::Completed, .. })
            );
        }
        assert_eq!(task, before);
    }

    #[test]
    fn completed_at_is_set_once() {
        let mut task = running();
        task.apply(Transition::ConfirmCancel, now()).unwrap();
        let completed_at = task.completed_at;

        let _ = task.apply(Transition::Fail(TaskFailure::new(FailureKind::StorageError, "x")), now());
        assert_eq!(task.completed_at, completed_at);
    }

    #[test]
    fn cancel_pending_is_immediately_terminal() {
        let mut task = pending();
        task.apply(Transition::Cancel, now()).unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn cancel_running_only_flags_the_request() {
        let mut task = running();
        assert!(task.apply(Transition::Cancel, now()).unwrap());
        assert_eq!(task.state, TaskState::Running);
        assert!(task.cancel_requested_at.is_some());

        let revision = task.revision;
        assert!(!task.apply(Transition::Cancel, now()).unwrap());
        assert_eq!(task.revision, revision);
    }

    #[test]
    fn outcome_after_cancel_request_ends_cancelled() {
        let mut completed = running();
        completed.apply(Transition::Cancel, now()).unwrap();
        completed.apply(Transition::Complete(json!({"done": true})), now()).unwrap();
        assert_eq!(completed.state, TaskState::Cancelled);
        assert!(completed.result.is_none());

        let mut failed = running();
        failed.apply(Transition::Cancel, now()).unwrap();
        failed
            .apply(
                Transition::Fail(TaskFailure::new(FailureKind::WorkFunctionError, "stopped")),
                now(),
            )
            .unwrap();
        assert_eq!(failed.state, TaskState::Cancelled);
        assert!(failed.error.is_none());
    }

    #[test]
    fn cancellation_timeout_still_fails_after_cancel_request() {
        let mut task = running();
        task.apply(Transition::Cancel, now()).unwrap();
        task.apply(
            Transition::Fail(TaskFailure::new(FailureKind::CancellationTimeout, "grace expired")),
            now(),
        )
        .unwrap();

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.unwrap().kind, FailureKind::CancellationTimeout);
    }

    #[test]
    fn pending_task_fails_only_for_storage() {
        let mut task = pending();
        let err = task
            .apply(
                Transition::Fail(TaskFailure::new(FailureKind::WorkFunctionError, "boom")),
                now(),
            )
            .unwrap_err();
        assert_matches!(err, TaskError::InvalidTransition { from: TaskState::Pending, .. });

        task.apply(
            Transition::Fail(TaskFailure::new(FailureKind::StorageError, "connection reset")),
            now(),
        )
        .unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn confirm_cancel_requires_running() {
        let mut task = pending();
        assert_matches!(
            task.apply(Transition::ConfirmCancel, now()),
            Err(TaskError::InvalidTransition { from: TaskState::Pending, .. })
        );
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("bogus".parse::<TaskState>().is_err());
    }

    #[test]
    fn snapshot_serializes_snake_case_state_and_failure() {
        let mut task = running();
        task.apply(
            Transition::Fail(TaskFailure::new(FailureKind::CancellationTimeout, "late")),
            now(),
        )
        .unwrap();

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"]["kind"], "cancellation_timeout");
        assert!(json.get("result").is_none());
    }
}
