use super::error_response;
use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use strato_plugin::TestRequest;

/// POST /strato/admin/plugins/:name/test
///
/// The body is an optional synthetic request description.
pub async fn test_plugin(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> (StatusCode, Json<Value>) {
    let fixture: TestRequest = if body.is_empty() {
        TestRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(fixture) => fixture,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("bad test request: {e}")})),
                );
            }
        }
    };
    match state.manager.test(&name, fixture).await {
        Ok(result) => (StatusCode::OK, Json(json!(result))),
        Err(e) => error_response(e),
    }
}

/// GET /strato/admin/plugins/:name/health
pub async fn plugin_health(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.health(&name) {
        Ok(status) => (StatusCode::OK, Json(json!(status))),
        Err(e) => error_response(e),
    }
}

/// GET /strato/admin/plugins/:name/metrics
pub async fn plugin_metrics(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.metrics(&name) {
        Ok(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        Err(e) => error_response(e),
    }
}

/// GET /strato/admin/plugins/metrics
pub async fn all_metrics(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!(state.manager.metrics_all()))
}
