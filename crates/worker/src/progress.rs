use std::sync::Arc;

use pmdash_core::task::{TaskError, TaskId, Transition};

use crate::runner::Committer;

/// Handle a work function uses to report progress on its own task.
///
/// Only the runner can build one, so a work function can touch nothing but
/// the progress of the task it was started for.
#[derive(Clone)]
pub struct ProgressSink {
    id: TaskId,
    committer: Arc<Committer>,
}

impl ProgressSink {
    pub(crate) fn new(id: TaskId, committer: Arc<Committer>) -> Self {
        Self { id, committer }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Record progress `n` (0..=100).
    ///
    /// A regression or a value above 100 is rejected with
    /// [`TaskError::InvalidProgress`]. Once the task is terminal, reports are
    /// dropped and `Ok` is returned.
    pub async fn report(&self, n: u8) -> Result<(), TaskError> {
        match self.committer.commit(self.id, Transition::Progress(n)).await {
            Ok(_) => Ok(()),
            Err(TaskError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::debug!(task_id = %self.id, progress = n, state = %from, "Dropped late progress report");
                Ok(())
            }
            Err(TaskError::Storage(message)) => {
                self.committer.fail_storage(self.id, &message).await;
                Err(TaskError::Storage(message))
            }
            Err(e) => Err(e),
        }
    }
}
