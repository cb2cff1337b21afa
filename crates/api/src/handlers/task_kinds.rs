//! Handler for the `/task-kinds` resource.

use axum::extract::State;
use axum::Json;
use pmdash_worker::TaskKindInfo;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/task-kinds
///
/// Registered task kinds with their display metadata, in registration order.
pub async fn list_task_kinds(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<TaskKindInfo>>>> {
    Ok(Json(DataResponse {
        data: state.gateway.kinds(),
    }))
}
