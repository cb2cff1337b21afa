//! Event names for task lifecycle changes.
//!
//! Published on the event bus by the runner and gateway, and forwarded to
//! WebSocket clients by the notification router.

use crate::task::{Task, TaskState};

/// Prefix shared by every task event; used for routing.
pub const TASK_EVENT_PREFIX: &str = "task.";

pub const EVENT_TASK_SUBMITTED: &str = "task.submitted";
pub const EVENT_TASK_STARTED: &str = "task.started";
pub const EVENT_TASK_PROGRESS: &str = "task.progress";
pub const EVENT_TASK_CANCEL_REQUESTED: &str = "task.cancel_requested";
pub const EVENT_TASK_COMPLETED: &str = "task.completed";
pub const EVENT_TASK_FAILED: &str = "task.failed";
pub const EVENT_TASK_CANCELLED: &str = "task.cancelled";

/// WebSocket message type for pushed task snapshots.
pub const MSG_TYPE_TASK_UPDATE: &str = "task_update";

/// Pick the event name describing the snapshot a commit just produced.
pub fn event_for_snapshot(task: &Task) -> &'static str {
    match task.state {
        TaskState::Pending => EVENT_TASK_SUBMITTED,
        // Only the commit that recorded the request stamps both fields.
        TaskState::Running if task.cancel_requested_at == Some(task.updated_at) => {
            EVENT_TASK_CANCEL_REQUESTED
        }
        TaskState::Running if task.progress == 0 => EVENT_TASK_STARTED,
        TaskState::Running => EVENT_TASK_PROGRESS,
        TaskState::Completed => EVENT_TASK_COMPLETED,
        TaskState::Failed => EVENT_TASK_FAILED,
        TaskState::Cancelled => EVENT_TASK_CANCELLED,
    }
}
