//! HTTP route handlers.
//!
//! All handlers speak JSON and report failures as a non-2xx status with a
//! `{"message": "..."}` body.

pub mod accounts;
pub mod blocks;
pub mod collections;
pub mod documents;
pub mod info;

use axum::Json;
use axum::http::StatusCode;
use serde_json::json;

/// The uniform error response: a status code plus a message body.
pub type ApiError = (StatusCode, Json<serde_json::Value>);

/// Builds the standard error response shape.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "message": message.into() })))
}
