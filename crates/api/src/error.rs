use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pmdash_core::task::TaskError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{error, code}` JSON
/// bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A task submission, registry, or runner error.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Missing, malformed, or expired credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A request body that is not the JSON the endpoint expects.
    #[error(transparent)]
    InvalidBody(#[from] JsonRejection),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Task(task) => match task {
                TaskError::InvalidKind(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_KIND", task.to_string())
                }
                TaskError::InvalidPayload(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", task.to_string())
                }
                TaskError::InvalidProgress { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_PROGRESS", task.to_string())
                }
                TaskError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", task.to_string()),
                TaskError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION", task.to_string())
                }
                TaskError::DuplicateId(_) | TaskError::Storage(_) => {
                    tracing::error!(error = %task, "Task service error");
                    internal()
                }
            },

            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),

            // Always 400, whatever status axum would have picked.
            AppError::InvalidBody(rejection) => {
                (StatusCode::BAD_REQUEST, "INVALID_BODY", rejection.body_text())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
