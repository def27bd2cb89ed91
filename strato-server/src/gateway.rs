//! Demo gateway listener.
//!
//! The chain is designed to be driven by an external HTTP framework;
//! this listener is the reference wiring: every request is converted to
//! a [`RequestContext`], dispatched through the chain, and the composed
//! response (or error) is written back. The terminal handler stands in
//! for upstream routing, which is not this host's concern.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::Response as AxumResponse;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use strato_plugin::{Dispatcher, Handler, RequestContext, Response};
use tracing::info;

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub async fn serve(addr: SocketAddr, dispatcher: Dispatcher) -> anyhow::Result<()> {
    let app = Router::new()
        .fallback(handle_request)
        .with_state(dispatcher);

    info!(addr = %addr, "Starting gateway listener");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Terminal handler: no upstream behind this demo host.
fn terminal_handler() -> Handler {
    Arc::new(|_ctx| {
        Box::pin(async {
            let mut resp = Response::with_body(
                404,
                serde_json::json!({"error": "no upstream configured", "status": 404}).to_string(),
            );
            resp.set_header("content-type".into(), "application/json".into());
            Ok(resp)
        })
    })
}

async fn handle_request(
    State(dispatcher): State<Dispatcher>,
    request: Request<Body>,
) -> AxumResponse {
    let (parts, body) = request.into_parts();

    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut ctx = RequestContext::new(parts.method.as_str(), uri, headers, "unknown");
    match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) if !bytes.is_empty() => ctx.body = Some(bytes.to_vec()),
        Ok(_) => {}
        Err(_) => {
            return error_body(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }
    }

    match dispatcher.dispatch(ctx, terminal_handler()).await {
        Ok(response) => {
            let mut builder = AxumResponse::builder()
                .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));
            for (name, value) in &response.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder
                .body(Body::from(response.body.unwrap_or_default()))
                .unwrap_or_else(|_| {
                    error_body(StatusCode::INTERNAL_SERVER_ERROR, "malformed response")
                })
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            AxumResponse::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(e.to_json_body()))
                .unwrap_or_else(|_| {
                    error_body(StatusCode::INTERNAL_SERVER_ERROR, "malformed error body")
                })
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> AxumResponse {
    AxumResponse::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"error": message, "status": status.as_u16()}).to_string(),
        ))
        .unwrap_or_default()
}
