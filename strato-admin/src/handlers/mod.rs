pub mod chain;
pub mod health;
pub mod observe;
pub mod plugins;
pub mod snapshots;

use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use strato_core::StratoError;

/// Map a host error onto the admin response envelope.
pub(crate) fn error_response(error: StratoError) -> (StatusCode, Json<Value>) {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({"error": error.to_string(), "status": error.status_code()})),
    )
}
