//! Route definitions for the `/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`. The snapshot stream lives with the
/// streaming routes.
///
/// ```text
/// GET    /                -> list_tasks
/// POST   /                -> submit_task
/// GET    /{id}            -> get_task
/// DELETE /{id}            -> delete_task
/// POST   /{id}/cancel     -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::submit_task))
        .route("/{id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
}
