pub mod health;
pub mod tasks;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Request/response routes mounted at `/api/v1`.
///
/// ```text
/// /tasks                      list, submit
/// /tasks/{id}                 get, delete
/// /tasks/{id}/cancel          request cancellation (POST)
///
/// /task-kinds                 registered kinds
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .route("/task-kinds", get(handlers::task_kinds::list_task_kinds))
}

/// Long-lived routes mounted at `/api/v1`.
///
/// ```text
/// /ws                         WebSocket push (task updates, project rooms)
/// /tasks/{id}/stream          server-sent snapshots
/// ```
pub fn streaming_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/tasks/{id}/stream", get(handlers::tasks::stream_task))
}
