//! Row model for the `tasks` table.

use pmdash_core::task::{Task, TaskError, TaskFailure, TaskState};
use pmdash_core::types::{DbId, Timestamp};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `tasks` table.
///
/// `state` and `error` are stored as TEXT and JSONB; [`TryFrom`] converts
/// the row into the domain [`Task`].
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub progress: i16,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub owner_id: DbId,
    pub project_id: Option<DbId>,
    pub revision: i64,
    pub cancel_requested_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let state: TaskState = row.state.parse().map_err(TaskError::Storage)?;
        let progress = u8::try_from(row.progress)
            .map_err(|_| TaskError::Storage(format!("Corrupt progress {}", row.progress)))?;
        let error = row
            .error
            .map(serde_json::from_value::<TaskFailure>)
            .transpose()
            .map_err(|e| TaskError::Storage(format!("Corrupt task error column: {e}")))?;

        Ok(Task {
            id: row.id.into(),
            kind: row.kind,
            payload: row.payload,
            state,
            progress,
            result: row.result,
            error,
            owner: row.owner_id,
            project_id: row.project_id,
            revision: row.revision,
            cancel_requested_at: row.cancel_requested_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
