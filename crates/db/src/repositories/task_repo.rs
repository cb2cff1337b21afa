//! Repository for the `tasks` table.

use pmdash_core::registry::TaskFilter;
use pmdash_core::task::Task;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, kind, payload, state, progress, result, error, \
    owner_id, project_id, revision, cancel_requested_at, \
    created_at, updated_at, started_at, completed_at";

/// Terminal states, as stored in the `state` column.
const TERMINAL_STATES: [&str; 3] = ["completed", "failed", "cancelled"];

/// Provides queries for task records.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a new task row.
    pub async fn insert(pool: &PgPool, task: &Task) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tasks \
                 (id, kind, payload, state, progress, owner_id, project_id, \
                  revision, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(task.id.as_uuid())
        .bind(&task.kind)
        .bind(&task.payload)
        .bind(task.state.as_str())
        .bind(i16::from(task.progress))
        .bind(task.owner)
        .bind(task.project_id)
        .bind(task.revision)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a task row for the rest of the surrounding transaction.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Write every mutable column of `task` back to its row.
    pub async fn save(conn: &mut PgConnection, task: &Task) -> Result<(), sqlx::Error> {
        let error = task
            .error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "UPDATE tasks SET \
                 state = $2, progress = $3, result = $4, error = $5, \
                 revision = $6, cancel_requested_at = $7, updated_at = $8, \
                 started_at = $9, completed_at = $10 \
             WHERE id = $1",
        )
        .bind(task.id.as_uuid())
        .bind(task.state.as_str())
        .bind(i16::from(task.progress))
        .bind(&task.result)
        .bind(error)
        .bind(task.revision)
        .bind(task.cancel_requested_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Delete a task only if it is in a terminal state.
    ///
    /// Returns `true` if a row was removed.
    pub async fn delete_terminal(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND state IN ($2, $3, $4)")
            .bind(id)
            .bind(TERMINAL_STATES[0])
            .bind(TERMINAL_STATES[1])
            .bind(TERMINAL_STATES[2])
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List tasks with optional owner, state, and project filters.
    pub async fn list(pool: &PgPool, filter: &TaskFilter) -> Result<Vec<TaskRow>, sqlx::Error> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if filter.owner.is_some() {
            conditions.push(format!("owner_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.state.is_some() {
            conditions.push(format!("state = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.project_id.is_some() {
            conditions.push(format!("project_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, TaskRow>(&query);

        if let Some(owner) = filter.owner {
            q = q.bind(owner);
        }
        if let Some(state) = filter.state {
            q = q.bind(state.as_str());
        }
        if let Some(project_id) = filter.project_id {
            q = q.bind(project_id);
        }

        q.bind(filter.limit()).bind(filter.offset()).fetch_all(pool).await
    }
}
