//! Shared fixtures for the integration tests: in-process middlewares that
//! record traversal order or fail on demand, plus a manager wired to an
//! in-memory store.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use strato_core::config::PluginHostConfig;
use strato_core::record::PluginRecord;
use strato_core::{Phase, RoutePattern};
use strato_plugin::middleware::{Middleware, RUSTC_VERSION};
use strato_plugin::{BuiltinCatalog, Handler, PluginManager, Response, UploadMeta};
use strato_store::{BlobStore, PluginStore};

/// Execution trace shared between fixtures and terminal handlers.
pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn trace_lines(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().clone()
}

/// Middleware that logs chain traversal into a [`Trace`].
pub struct Recording {
    name: String,
    trace: Trace,
}

impl Recording {
    pub fn new(name: impl Into<String>, trace: Trace) -> Self {
        Self {
            name: name.into(),
            trace,
        }
    }
}

impl Middleware for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    fn wrap(&self, next: Handler) -> Handler {
        let name = self.name.clone();
        let trace = Arc::clone(&self.trace);
        Arc::new(move |ctx| {
            let name = name.clone();
            let trace = Arc::clone(&trace);
            let next = Arc::clone(&next);
            Box::pin(async move {
                trace.lock().unwrap().push(format!("{name}:enter"));
                let result = next(ctx).await;
                trace.lock().unwrap().push(format!("{name}:exit"));
                result
            })
        })
    }
}

/// Terminal handler that logs its invocation and returns 200.
pub fn terminal(trace: &Trace) -> Handler {
    let trace = Arc::clone(trace);
    Arc::new(move |_ctx| {
        let trace = Arc::clone(&trace);
        Box::pin(async move {
            trace.lock().unwrap().push("terminal".to_string());
            Ok(Response::new(200))
        })
    })
}

// ── Builtin middlewares for manager-level tests ──────────────
//
// Builtin constructors are plain fn pointers, so these are driven by
// their configuration and by request headers rather than captured state.

/// Appends `tag` from its config to the `trail` context var, so the
/// terminal handler can observe traversal order.
struct Tagger {
    tag: String,
}

impl Middleware for Tagger {
    fn name(&self) -> &str {
        "tagger"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let tag = self.tag.clone();
        Arc::new(move |mut ctx| {
            let tag = tag.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let mut trail: Vec<String> = ctx
                    .get_var("trail")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                trail.push(tag.clone());
                ctx.set_var("trail".into(), serde_json::json!(trail));
                next(ctx).await
            })
        })
    }
}

fn tagger_constructor(
    config: &serde_json::Value,
) -> Result<Box<dyn Middleware>, String> {
    let tag = config
        .get("tag")
        .and_then(|v| v.as_str())
        .unwrap_or("tagger")
        .to_string();
    Ok(Box::new(Tagger { tag }))
}

/// Fails any request carrying the `x-fail` header.
struct Flaky;

impl Middleware for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    fn wrap(&self, next: Handler) -> Handler {
        Arc::new(move |ctx| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                if ctx.get_header("x-fail").is_some() {
                    return Err(strato_core::StratoError::plugin_fault(
                        "flaky",
                        "x-fail header present",
                    ));
                }
                next(ctx).await
            })
        })
    }
}

fn flaky_constructor(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
    Ok(Box::new(Flaky))
}

fn broken_constructor(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
    Err("constructor always fails".to_string())
}

pub fn catalog() -> BuiltinCatalog {
    let catalog = BuiltinCatalog::new();
    catalog.register("tagger", tagger_constructor);
    catalog.register("flaky", flaky_constructor);
    catalog.register("broken", broken_constructor);
    catalog
}

/// A manager over an in-memory store and a temp blob dir. The tempdir
/// guard must outlive the manager.
pub fn manager(dir: &tempfile::TempDir) -> Arc<PluginManager> {
    let config = PluginHostConfig {
        blob_dir: dir.path().join("blobs"),
        staging_dir: dir.path().join("staging"),
        ..Default::default()
    };
    let store = Arc::new(PluginStore::in_memory());
    let blobs = Arc::new(BlobStore::open(dir.path().join("blobs")).unwrap());
    Arc::new(PluginManager::new(config, store, blobs, catalog(), None))
}

/// A stored (not yet enabled) record for a builtin middleware.
pub async fn seed_builtin(
    manager: &PluginManager,
    name: &str,
    builtin: &str,
    priority: u32,
    routes: &[&str],
    phase: Phase,
) -> PluginRecord {
    let mut record = PluginRecord::new(name, "1.0", format!("builtin:{builtin}"));
    record.priority = priority;
    record.routes = routes
        .iter()
        .map(|r| RoutePattern::parse(r).unwrap())
        .collect();
    record.phase = phase;
    if builtin == "tagger" {
        record
            .config
            .insert("tag".into(), serde_json::json!(name));
    }
    manager.store().save(record).await.unwrap()
}

/// Artifact bytes that pass validation: ELF magic, matching ABI marker,
/// declaration symbol, padded past the security floor.
pub fn fake_artifact_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; 20];
    bytes[..4].copy_from_slice(b"\x7fELF");
    bytes[18] = 0x3e;
    bytes.extend_from_slice(format!("strato-abi:{RUSTC_VERSION}\0").as_bytes());
    bytes.extend_from_slice(b"strato_middleware_declaration\0");
    bytes.resize(bytes.len().max(512), 0);
    bytes
}

pub fn upload_meta(name: &str, version: &str) -> UploadMeta {
    UploadMeta {
        name: name.to_string(),
        version: version.to_string(),
        description: "test artifact".into(),
        author: "tests".into(),
        uploaded_by: "tests".into(),
        filename: format!("{name}.so"),
        config: serde_json::Map::new(),
        priority: 10,
        routes: vec![RoutePattern::parse("/*").unwrap()],
        phase: Phase::PreAuth,
        tags: BTreeSet::new(),
    }
}
