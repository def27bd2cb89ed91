//! Integration tests for the Admin REST API handlers.
//!
//! Uses `tower::ServiceExt::oneshot` to call handlers without binding a
//! real TCP port — every test gets a fresh in-memory state.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use std::sync::Arc;
use strato_admin::{build_admin_router, AdminState};
use strato_core::config::PluginHostConfig;
use strato_core::record::PluginRecord;
use strato_core::{Phase, RoutePattern};
use strato_plugin::middleware::RUSTC_VERSION;
use strato_plugin::{BuiltinCatalog, PluginManager};
use strato_store::{BlobStore, PluginStore};
use tower::ServiceExt; // .oneshot()

// ── Helpers ──────────────────────────────────────────────────

struct Fixture {
    state: Arc<AdminState>,
    _dir: tempfile::TempDir,
}

fn make_state() -> Fixture {
    make_state_with_key(None)
}

fn make_state_with_key(api_key: Option<&str>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = PluginHostConfig {
        blob_dir: dir.path().join("blobs"),
        staging_dir: dir.path().join("staging"),
        ..Default::default()
    };
    let store = Arc::new(PluginStore::in_memory());
    let blobs = Arc::new(BlobStore::open(dir.path().join("blobs")).unwrap());
    let catalog = BuiltinCatalog::new();
    strato_middlewares::register_all(&catalog);
    let manager = Arc::new(PluginManager::new(config, store, blobs, catalog, None));
    Fixture {
        state: Arc::new(AdminState {
            manager,
            api_key: api_key.map(str::to_string),
        }),
        _dir: dir,
    }
}

async fn seed(state: &AdminState, name: &str, priority: u32) {
    let mut record = PluginRecord::new(name, "1.0", "builtin:request-id");
    record.priority = priority;
    record.routes = vec![RoutePattern::parse("*").unwrap()];
    state.manager.store().save(record).await.unwrap();
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_req(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Multipart body for an artifact upload.
fn multipart_upload(name: &str, version: &str, artifact: &[u8]) -> Request<Body> {
    let boundary = "strato-test-boundary";
    let mut body: Vec<u8> = Vec::new();
    for (field, value) in [
        ("name", name),
        ("version", version),
        ("priority", "10"),
        ("routes", "/*"),
        ("phase", "pre-auth"),
    ] {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\ncontent-disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"artifact\"; filename=\"{name}.so\"\r\ncontent-type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(artifact);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/strato/admin/plugins")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Artifact bytes accepted by the validator.
fn fake_artifact() -> Vec<u8> {
    let mut bytes = vec![0u8; 20];
    bytes[..4].copy_from_slice(b"\x7fELF");
    bytes[18] = 0x3e;
    bytes.extend_from_slice(format!("strato-abi:{RUSTC_VERSION}\0").as_bytes());
    bytes.extend_from_slice(b"strato_middleware_declaration\0");
    bytes.resize(bytes.len().max(512), 0);
    bytes
}

// ── Health & stats ───────────────────────────────────────────

#[tokio::test]
async fn health_check_returns_200() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let resp = app.oneshot(get_req("/strato/admin/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["status"], "ok");
}

#[tokio::test]
async fn stats_report_counts() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app.oneshot(get_req("/strato/admin/stats")).await.unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total_plugins"], 1);
    assert_eq!(j["chain_entries"], 0);
}

// ── Upload ───────────────────────────────────────────────────

#[tokio::test]
async fn upload_creates_record() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(multipart_upload("auth", "1.0", &fake_artifact()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let j = body_json(resp).await;
    assert_eq!(j["name"], "auth");
    assert_eq!(j["version"], "1.0");
    assert_eq!(j["enabled"], false);
    assert_eq!(j["status"], "uploaded");
    assert_eq!(j["phase"], "pre-auth");
}

#[tokio::test]
async fn duplicate_upload_returns_409() {
    let fixture = make_state();
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(multipart_upload("auth", "1.0", &fake_artifact()))
        .await
        .unwrap();
    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(multipart_upload("auth", "1.0", &fake_artifact()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn upload_of_invalid_artifact_returns_422() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(multipart_upload("junk", "1.0", b"this is not a dynamic library at all"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn upload_without_artifact_part_returns_400() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let boundary = "strato-test-boundary";
    let body = format!(
        "--{boundary}\r\ncontent-disposition: form-data; name=\"name\"\r\n\r\nx\r\n--{boundary}--\r\n"
    );
    let req = Request::builder()
        .method(Method::POST)
        .uri("/strato/admin/plugins")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── List / get ───────────────────────────────────────────────

#[tokio::test]
async fn list_returns_seeded_plugins() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    seed(&fixture.state, "b", 20).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app.oneshot(get_req("/strato/admin/plugins")).await.unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 2);
}

#[tokio::test]
async fn list_filters_by_enabled() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    seed(&fixture.state, "b", 20).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(get_req("/strato/admin/plugins?enabled=true"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 1);
    assert_eq!(j["list"][0]["name"], "a");
}

#[tokio::test]
async fn get_missing_plugin_returns_404() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(get_req("/strato/admin/plugins/ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Enable / disable / delete ────────────────────────────────

#[tokio::test]
async fn enable_registers_in_chain() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["enabled"], true);
    assert_eq!(j["status"], "active");

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2.oneshot(get_req("/strato/admin/chain")).await.unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 1);
    assert_eq!(j["list"][0]["name"], "a");
}

#[tokio::test]
async fn disable_removes_from_chain() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();
    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(post_req("/strato/admin/plugins/a/disable"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(fixture.state.manager.chain().len(), 0);
}

#[tokio::test]
async fn delete_removes_record() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(delete_req("/strato/admin/plugins/a"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!fixture.state.manager.store().contains("a"));
}

// ── Targeted mutations ───────────────────────────────────────

#[tokio::test]
async fn set_priority_validates_range() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;

    let app1 = build_admin_router(fixture.state.clone());
    let resp = app1
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/priority",
            serde_json::json!({"priority": 500}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/priority",
            serde_json::json!({"priority": 1001}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn set_routes_and_phase() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;

    let app1 = build_admin_router(fixture.state.clone());
    let resp = app1
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/routes",
            serde_json::json!({"routes": ["/api/*"]}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/phase",
            serde_json::json!({"phase": "post-route"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let record = fixture.state.manager.store().get("a").unwrap();
    assert_eq!(record.routes[0].as_str(), "/api/*");
    assert_eq!(record.phase, Phase::PostRoute);
}

#[tokio::test]
async fn bad_phase_returns_4xx() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/phase",
            serde_json::json!({"phase": "mid-flight"}),
        ))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn update_config_persists_mapping() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(json_req(
            Method::PUT,
            "/strato/admin/plugins/a/config",
            serde_json::json!({"header": "x-trace"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let record = fixture.state.manager.store().get("a").unwrap();
    assert_eq!(record.config["header"], "x-trace");
}

// ── Chain operations ─────────────────────────────────────────

#[tokio::test]
async fn reorder_applies_updates() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    seed(&fixture.state, "b", 20).await;
    for name in ["a", "b"] {
        let app = build_admin_router(fixture.state.clone());
        app.oneshot(post_req(&format!("/strato/admin/plugins/{name}/enable")))
            .await
            .unwrap();
    }

    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(json_req(
            Method::POST,
            "/strato/admin/chain/reorder",
            serde_json::json!({"updates": [
                {"name": "a", "priority": 900},
                {"name": "b", "priority": 100}
            ]}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["applied"], 2);

    let names: Vec<String> = fixture
        .state
        .manager
        .chain()
        .list()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["b", "a"]);
}

#[tokio::test]
async fn chain_reload_reports_counts() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(post_req("/strato/admin/chain/reload"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 1);
    assert_eq!(j["reloaded"], 1);
}

// ── Observation ──────────────────────────────────────────────

#[tokio::test]
async fn plugin_health_and_metrics() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(get_req("/strato/admin/plugins/a/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["state"], "healthy");

    let app3 = build_admin_router(fixture.state.clone());
    let resp = app3
        .oneshot(get_req("/strato/admin/plugins/a/metrics"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total_requests"], 0);
}

#[tokio::test]
async fn test_endpoint_dry_runs_plugin() {
    let fixture = make_state();
    seed(&fixture.state, "a", 10).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/enable"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(json_req(
            Method::POST,
            "/strato/admin/plugins/a/test",
            serde_json::json!({"path": "/api/x"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["status"], 200);
}

// ── Snapshots ────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_then_rollback_restores_priority() {
    let fixture = make_state();
    seed(&fixture.state, "a", 100).await;

    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/snapshot"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    app2.oneshot(json_req(
        Method::PUT,
        "/strato/admin/plugins/a/priority",
        serde_json::json!({"priority": 900}),
    ))
    .await
    .unwrap();

    let app3 = build_admin_router(fixture.state.clone());
    let resp = app3
        .oneshot(post_req("/strato/admin/plugins/a/rollback"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["priority"], 100);
}

#[tokio::test]
async fn list_snapshots_returns_history() {
    let fixture = make_state();
    seed(&fixture.state, "a", 100).await;
    let app1 = build_admin_router(fixture.state.clone());
    app1.oneshot(post_req("/strato/admin/plugins/a/snapshot"))
        .await
        .unwrap();

    let app2 = build_admin_router(fixture.state.clone());
    let resp = app2
        .oneshot(get_req("/strato/admin/plugins/a/snapshots"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 1);
    assert_eq!(j["list"][0]["priority"], 100);
}

#[tokio::test]
async fn rollback_without_history_returns_400() {
    let fixture = make_state();
    seed(&fixture.state, "a", 100).await;
    let app = build_admin_router(fixture.state.clone());
    let resp = app
        .oneshot(post_req("/strato/admin/plugins/a/rollback"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Auth middleware ──────────────────────────────────────────

#[tokio::test]
async fn configured_api_key_is_enforced() {
    let fixture = make_state_with_key(Some("secret"));
    let app1 = build_admin_router(fixture.state.clone());
    let resp = app1.oneshot(get_req("/strato/admin/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let app2 = build_admin_router(fixture.state.clone());
    let req = Request::builder()
        .method(Method::GET)
        .uri("/strato/admin/health")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let resp = app2.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Prometheus exposition ────────────────────────────────────

#[tokio::test]
async fn metrics_endpoint_without_collector_is_empty() {
    let fixture = make_state();
    let app = build_admin_router(fixture.state.clone());
    let resp = app.oneshot(get_req("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
