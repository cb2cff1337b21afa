//! Handlers for the `/tasks` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Users see only
//! their own tasks; admins see every task. A task the caller may not see is
//! reported as not found so ids do not leak across principals.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use pmdash_core::registry::{TaskFilter, TaskRegistry};
use pmdash_core::task::{Task, TaskError, TaskId, TaskState};
use pmdash_core::types::DbId;
use pmdash_worker::NewTask;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extract::ValidJson;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// SSE event name for task snapshots.
const SNAPSHOT_EVENT: &str = "snapshot";

/// Tells nginx-style proxies not to buffer the snapshot stream.
const NO_PROXY_BUFFERING: (&str, &str) = ("x-accel-buffering", "no");

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, alias = "projectId")]
    pub project_id: Option<DbId>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedTask {
    pub id: TaskId,
    pub state: TaskState,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    /// Only honoured for admins; everyone else is scoped to their own tasks.
    pub owner: Option<DbId>,
    pub state: Option<TaskState>,
    #[serde(alias = "projectId")]
    pub project_id: Option<DbId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a path id to a task the caller may see.
///
/// Malformed ids, unknown ids, and other users' tasks are all `NotFound`.
async fn find_and_authorize(state: &AppState, raw_id: &str, auth: &AuthUser) -> AppResult<Task> {
    let id: TaskId = raw_id
        .parse()
        .map_err(|_| TaskError::NotFound(raw_id.to_string()))?;

    let task = state.notifier.poll(id).await?;
    if task.owner != auth.user_id && !auth.is_admin() {
        tracing::debug!(task_id = %id, user_id = auth.user_id, "Task hidden from non-owner");
        return Err(TaskError::not_found(id).into());
    }

    Ok(task)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Validate and enqueue a task. Returns 202 with its id and `pending` state;
/// work-function failures surface later through the task's status.
pub async fn submit_task(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidJson(input): ValidJson<SubmitTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let id = state
        .gateway
        .submit(NewTask {
            kind: input.kind,
            payload: input.payload,
            owner: auth.user_id,
            project_id: input.project_id,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedTask {
                id,
                state: TaskState::Pending,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// Newest first. Supports `state`, `project_id`, `limit`, and `offset`.
pub async fn list_tasks(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> AppResult<impl IntoResponse> {
    let owner = if auth.is_admin() {
        params.owner
    } else {
        Some(auth.user_id)
    };
    let filter = TaskFilter {
        owner,
        state: params.state,
        project_id: params.project_id,
        limit: params.limit,
        offset: params.offset,
    };

    let tasks = state.registry.list(&filter).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/tasks/{id}
///
/// Latest committed snapshot.
pub async fn get_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = find_and_authorize(&state, &id, &auth).await?;
    Ok(Json(DataResponse { data: task }))
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{id}/stream
///
/// Server-sent events: one `snapshot` event for the current state, then one
/// per newer snapshot. The stream closes after the terminal snapshot.
pub async fn stream_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<(
    [(&'static str, &'static str); 1],
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
)> {
    let task = find_and_authorize(&state, &id, &auth).await?;
    let snapshots = state.notifier.subscribe(task.id).await?;

    tracing::debug!(task_id = %task.id, user_id = auth.user_id, "Task stream opened");

    let events = snapshots.map(|snapshot| {
        let event = Event::default()
            .event(SNAPSHOT_EVENT)
            .id(snapshot.revision.to_string());
        Ok::<_, Infallible>(match event.json_data(&snapshot) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(task_id = %snapshot.id, error = %e, "Failed to encode snapshot");
                Event::default().event(SNAPSHOT_EVENT).comment("encoding error")
            }
        })
    });

    Ok((
        [NO_PROXY_BUFFERING],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

// ---------------------------------------------------------------------------
// Cancel / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/{id}/cancel
///
/// Pending tasks are cancelled at once. Running tasks are flagged and their
/// work function signalled; the snapshot returned may still be `running`.
/// Returns 409 if the task is already terminal.
pub async fn cancel_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = find_and_authorize(&state, &id, &auth).await?;
    let snapshot = state.runner().cancel(task.id).await?;

    tracing::info!(task_id = %task.id, user_id = auth.user_id, state = %snapshot.state, "Task cancel requested");

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: snapshot })))
}

/// DELETE /api/v1/tasks/{id}
///
/// Remove a terminal task. Returns 204, or 409 while the task is still live.
pub async fn delete_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let task = find_and_authorize(&state, &id, &auth).await?;
    state.registry.purge(task.id).await?;
    state.notifier.forget(task.id);

    tracing::info!(task_id = %task.id, user_id = auth.user_id, "Task purged");
    Ok(StatusCode::NO_CONTENT)
}
