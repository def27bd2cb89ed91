use super::error_response;
use crate::server::AdminState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// POST /strato/admin/plugins/:name/snapshot
pub async fn take_snapshot(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .snapshot(&name, &CancellationToken::new())
        .await
    {
        Ok(snapshot) => (StatusCode::OK, Json(json!(snapshot))),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
pub struct RollbackBody {
    /// Roll back to the snapshot with this exact timestamp; when absent,
    /// roll back to the previous configuration.
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// POST /strato/admin/plugins/:name/rollback
///
/// The body may name a snapshot timestamp; without one the previous
/// configuration is restored.
pub async fn rollback(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> (StatusCode, Json<Value>) {
    let body: RollbackBody = if body.is_empty() {
        RollbackBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("bad rollback request: {e}")})),
                );
            }
        }
    };
    let cancel = CancellationToken::new();
    let result = match body.timestamp {
        Some(timestamp) => state.manager.rollback_to(&name, timestamp, &cancel).await,
        None => state.manager.rollback(&name, &cancel).await,
    };
    match result {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/plugins/snapshot-all
pub async fn snapshot_all(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let taken = state.manager.snapshot_all();
    Json(json!({"taken": taken}))
}

/// GET /strato/admin/plugins/:name/snapshots
pub async fn list_snapshots(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.list_snapshots(&name) {
        Ok(snapshots) => (
            StatusCode::OK,
            Json(json!({"list": snapshots, "total": snapshots.len()})),
        ),
        Err(e) => error_response(e),
    }
}
