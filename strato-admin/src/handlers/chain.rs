use super::error_response;
use crate::server::AdminState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// GET /strato/admin/chain
pub async fn list_chain(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let entries = state.manager.chain().list();
    Json(json!({"list": entries, "total": entries.len()}))
}

#[derive(Deserialize)]
pub struct ReorderEntry {
    pub name: String,
    pub priority: u32,
}

#[derive(Deserialize)]
pub struct ReorderBody {
    pub updates: Vec<ReorderEntry>,
}

/// POST /strato/admin/chain/reorder
pub async fn reorder(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<ReorderBody>,
) -> (StatusCode, Json<Value>) {
    let updates: Vec<(String, u32)> = body
        .updates
        .into_iter()
        .map(|u| (u.name, u.priority))
        .collect();
    match state
        .manager
        .reorder(&updates, &CancellationToken::new())
        .await
    {
        Ok(applied) => (StatusCode::OK, Json(json!({"applied": applied}))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/chain/reload
pub async fn reload_all(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let report = state.manager.reload_all(&CancellationToken::new()).await;
    Json(json!(report))
}

#[derive(Deserialize)]
pub struct NameBody {
    pub name: String,
}

/// POST /strato/admin/chain/register
pub async fn register(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<NameBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .register(&body.name, &CancellationToken::new())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(json!({"registered": body.name}))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/chain/unregister
pub async fn unregister(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<NameBody>,
) -> Json<Value> {
    let present = state.manager.unregister(&body.name).await;
    Json(json!({"unregistered": body.name, "was_present": present}))
}
