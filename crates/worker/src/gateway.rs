//! Submission gateway: the only way a task enters the system.

use chrono::Utc;
use pmdash_core::task::{Task, TaskError, TaskId};
use pmdash_core::types::DbId;

use crate::kinds::TaskKindInfo;
use crate::runner::TaskRunner;

/// A validated-on-submit request for new work.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: String,
    pub payload: serde_json::Value,
    pub owner: DbId,
    pub project_id: Option<DbId>,
}

#[derive(Clone)]
pub struct SubmissionGateway {
    runner: TaskRunner,
}

impl SubmissionGateway {
    pub fn new(runner: TaskRunner) -> Self {
        Self { runner }
    }

    /// Validate, record, and schedule a task.
    ///
    /// The Pending task is readable from the registry by the time this
    /// returns. Work-function failures never surface here.
    pub async fn submit(&self, new: NewTask) -> Result<TaskId, TaskError> {
        let spec = self
            .runner
            .kinds()
            .get(&new.kind)
            .ok_or_else(|| TaskError::InvalidKind(new.kind.clone()))?;

        if new.owner <= 0 {
            return Err(TaskError::InvalidPayload(format!(
                "owner {} is not a valid principal",
                new.owner
            )));
        }

        let max = self.runner.config().max_payload_bytes;
        let size = serde_json::to_vec(&new.payload)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?
            .len();
        if size > max {
            return Err(TaskError::InvalidPayload(format!(
                "payload is {size} bytes, limit is {max}"
            )));
        }

        spec.work
            .validate(&new.payload)
            .map_err(TaskError::InvalidPayload)?;

        let task = Task::new(
            TaskId::new(),
            spec.info.id.clone(),
            new.payload,
            new.owner,
            new.project_id,
            Utc::now(),
        );
        let id = task.id;

        if let Err(e) = self.runner.registry().create(task.clone()).await {
            if matches!(e, TaskError::DuplicateId(_)) {
                tracing::error!(task_id = %id, "Allocated task id already exists");
            }
            return Err(e);
        }

        self.runner.announce(&task);
        self.runner.schedule(id);

        tracing::info!(
            task_id = %id,
            kind = %task.kind,
            owner = task.owner,
            project_id = ?task.project_id,
            "Task submitted",
        );
        Ok(id)
    }

    /// Registered kinds with their display metadata.
    pub fn kinds(&self) -> Vec<TaskKindInfo> {
        self.runner.kinds().list()
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }
}
