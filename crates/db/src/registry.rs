//! [`TaskRegistry`] implementation over the `tasks` table.
//!
//! `update` and `purge` run in a transaction that locks the target row with
//! `SELECT ... FOR UPDATE`, so writers to one task serialize while writers
//! to other tasks proceed independently.

use async_trait::async_trait;
use pmdash_core::registry::{TaskFilter, TaskRegistry};
use pmdash_core::task::{Task, TaskError, TaskId, Transition};

use crate::repositories::TaskRepo;
use crate::DbPool;

/// PostgreSQL unique violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed task registry.
#[derive(Debug, Clone)]
pub struct PgTaskRegistry {
    pool: DbPool,
}

impl PgTaskRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn storage(err: sqlx::Error) -> TaskError {
    tracing::warn!(error = %err, "Task registry storage error");
    TaskError::Storage(err.to_string())
}

#[async_trait]
impl TaskRegistry for PgTaskRegistry {
    async fn create(&self, task: Task) -> Result<(), TaskError> {
        match TaskRepo::insert(&self.pool, &task).await {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(TaskError::DuplicateId(task.id))
            }
            Err(e) => Err(storage(e)),
        }
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        TaskRepo::find_by_id(&self.pool, id.as_uuid())
            .await
            .map_err(storage)?
            .ok_or_else(|| TaskError::not_found(id))
            .and_then(Task::try_from)
    }

    async fn update(&self, id: TaskId, transition: Transition) -> Result<Task, TaskError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = TaskRepo::find_for_update(&mut *tx, id.as_uuid())
            .await
            .map_err(storage)?
            .ok_or_else(|| TaskError::not_found(id))?;
        let mut task = Task::try_from(row)?;

        // A rejected transition drops `tx`, which rolls back and releases the lock.
        if task.apply(transition, chrono::Utc::now())? {
            TaskRepo::save(&mut *tx, &task).await.map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(task)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        TaskRepo::list(&self.pool, filter)
            .await
            .map_err(storage)?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn purge(&self, id: TaskId) -> Result<(), TaskError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row = TaskRepo::find_for_update(&mut *tx, id.as_uuid())
            .await
            .map_err(storage)?
            .ok_or_else(|| TaskError::not_found(id))?;
        let task = Task::try_from(row)?;
        if !task.is_terminal() {
            return Err(TaskError::InvalidTransition {
                id,
                from: task.state,
                action: "purge",
            });
        }

        TaskRepo::delete_terminal(&mut *tx, id.as_uuid())
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
