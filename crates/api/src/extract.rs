//! Request extractors with the service's error envelope.

use axum::extract::FromRequest;

use crate::error::AppError;

/// [`axum::Json`] whose rejections become `400 {error, code}` responses.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ValidJson<T>(pub T);
