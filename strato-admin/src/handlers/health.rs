use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /strato/admin/health
pub async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "chain_entries": state.manager.chain().len(),
    }))
}

/// GET /strato/admin/stats
pub async fn stats(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!(state.manager.stats().await))
}
