use super::error_response;
use crate::server::AdminState;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use strato_core::record::RecordFilter;
use strato_core::{Phase, RoutePattern, StratoError};
use strato_plugin::UploadMeta;
use tokio_util::sync::CancellationToken;

/// POST /strato/admin/plugins
///
/// Multipart upload: an `artifact` file part plus metadata parts
/// (`name`, `version`, `description`, `author`, `config`, `priority`,
/// `routes`, `phase`, `tags`).
pub async fn upload_plugin(
    State(state): State<Arc<AdminState>>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut meta = UploadMeta::default();
    let mut content: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("malformed multipart body: {e}")})),
                );
            }
        };
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "artifact" | "file" => {
                if let Some(filename) = field.file_name() {
                    meta.filename = filename.to_string();
                }
                match field.bytes().await {
                    Ok(bytes) => content = Some(bytes.to_vec()),
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": format!("failed to read artifact: {e}")})),
                        );
                    }
                }
            }
            other => {
                let text = match field.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"error": format!("failed to read field {other}: {e}")})),
                        );
                    }
                };
                if let Err(e) = apply_meta_field(&mut meta, other, &text) {
                    return error_response(e);
                }
            }
        }
    }

    let Some(content) = content else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing artifact part"})),
        );
    };

    match state
        .manager
        .upload(meta, &content, &CancellationToken::new())
        .await
    {
        Ok(record) => (StatusCode::CREATED, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

fn apply_meta_field(meta: &mut UploadMeta, name: &str, value: &str) -> Result<(), StratoError> {
    match name {
        "name" => meta.name = value.to_string(),
        "version" => meta.version = value.to_string(),
        "description" => meta.description = value.to_string(),
        "author" => meta.author = value.to_string(),
        "uploaded_by" => meta.uploaded_by = value.to_string(),
        "config" => {
            meta.config = serde_json::from_str(value).map_err(|e| {
                StratoError::InvalidArgument(format!("config must be a JSON object: {e}"))
            })?;
        }
        "priority" => {
            meta.priority = value.parse().map_err(|_| {
                StratoError::InvalidArgument(format!("priority must be an integer: {value:?}"))
            })?;
        }
        "routes" => {
            meta.routes = parse_routes(value)?;
        }
        "phase" => {
            meta.phase = value.parse()?;
        }
        "tags" => {
            meta.tags = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<BTreeSet<String>>();
        }
        unknown => {
            return Err(StratoError::InvalidArgument(format!(
                "unknown upload field: {unknown}"
            )));
        }
    }
    Ok(())
}

/// Routes arrive either as a JSON array or comma-separated patterns.
fn parse_routes(value: &str) -> Result<Vec<RoutePattern>, StratoError> {
    if value.trim_start().starts_with('[') {
        serde_json::from_str(value)
            .map_err(|e| StratoError::InvalidArgument(format!("bad route list: {e}")))
    } else {
        value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(RoutePattern::parse)
            .collect()
    }
}

/// GET /strato/admin/plugins
pub async fn list_plugins(
    State(state): State<Arc<AdminState>>,
    Query(filter): Query<RecordFilter>,
) -> Json<Value> {
    let plugins = state.manager.store().list(&filter);
    Json(json!({"list": plugins, "total": plugins.len()}))
}

/// GET /strato/admin/plugins/:name
pub async fn get_plugin(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.store().get(&name) {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

/// DELETE /strato/admin/plugins/:name
pub async fn delete_plugin(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.delete(&name, &CancellationToken::new()).await {
        Ok(_) => (StatusCode::OK, Json(json!({"deleted": true}))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/plugins/:name/enable
pub async fn enable_plugin(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.enable(&name, &CancellationToken::new()).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/plugins/:name/disable
pub async fn disable_plugin(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.manager.disable(&name, &CancellationToken::new()).await {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

/// PUT /strato/admin/plugins/:name/config
pub async fn update_config(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Json(config): Json<serde_json::Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .update_config(&name, config, &CancellationToken::new())
        .await
    {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct PriorityBody {
    pub priority: u32,
}

/// PUT /strato/admin/plugins/:name/priority
pub async fn set_priority(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Json(body): Json<PriorityBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .set_priority(&name, body.priority, &CancellationToken::new())
        .await
    {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct RoutesBody {
    pub routes: Vec<RoutePattern>,
}

/// PUT /strato/admin/plugins/:name/routes
pub async fn set_routes(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Json(body): Json<RoutesBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .set_routes(&name, body.routes, &CancellationToken::new())
        .await
    {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct PhaseBody {
    pub phase: Phase,
}

/// PUT /strato/admin/plugins/:name/phase
pub async fn set_phase(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
    Json(body): Json<PhaseBody>,
) -> (StatusCode, Json<Value>) {
    match state
        .manager
        .set_phase(&name, body.phase, &CancellationToken::new())
        .await
    {
        Ok(record) => (StatusCode::OK, Json(json!(record))),
        Err(e) => error_response(e),
    }
}

/// POST /strato/admin/plugins/enable-all
pub async fn enable_all(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let report = state.manager.enable_all(&CancellationToken::new()).await;
    Json(json!(report))
}

/// POST /strato/admin/plugins/disable-all
pub async fn disable_all(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let report = state.manager.disable_all(&CancellationToken::new()).await;
    Json(json!(report))
}
