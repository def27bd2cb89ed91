// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Strato — dynamic middleware plugin host
//
//  Admin API:  axum REST surface for the full plugin lifecycle
//  Gateway:    demo listener funneling requests through the chain
//  Storage:    standalone JSON state file / etcd (feature "etcd")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod gateway;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use strato_admin::AdminServer;
use strato_core::config::{StoreMode, StratoConfig};
use strato_observability::MetricsCollector;
use strato_plugin::{BuiltinCatalog, PluginManager};
use strato_store::{BlobStore, PluginStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "strato", version, about = "Strato — dynamic middleware plugin host")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the JSON state file used for plugin records
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Strato starting");

    // ── Config ──
    let mut config = StratoConfig::load(cli.config.as_deref().and_then(|p| p.to_str()))?;
    if let Some(state_file) = cli.state_file {
        config.store.state_file = state_file;
    }

    // ── Record store ──
    let store = open_store(&config).await?;

    // ── Blob store ──
    let blobs = Arc::new(BlobStore::open(&config.plugins.blob_dir)?);

    // ── Builtin middlewares ──
    let catalog = BuiltinCatalog::new();
    strato_middlewares::register_all(&catalog);
    info!(builtins = catalog.list().len(), "Builtin middlewares registered");

    // ── Metrics collector ──
    let collector = Arc::new(MetricsCollector::new()?);

    // ── Plugin manager ──
    let manager = Arc::new(PluginManager::new(
        config.plugins.clone(),
        store,
        blobs,
        catalog,
        Some(Arc::clone(&collector)),
    ));

    // ── Re-enable the stored enabled set ──
    let report = manager.reload_all(&CancellationToken::new()).await;
    if report.errors.is_empty() {
        info!(reloaded = report.reloaded, "Stored plugins loaded");
    } else {
        warn!(
            reloaded = report.reloaded,
            errors = ?report.errors,
            "Some stored plugins failed to load"
        );
    }

    // ── Health sweep ──
    let sweep = manager.start_health_sweep();

    // ── Admin API ──
    let admin = AdminServer::new(config.admin.clone(), Arc::clone(&manager));
    let admin_task = tokio::spawn(admin.start());

    // ── Gateway listener ──
    let gateway_task = if config.gateway.enabled {
        let dispatcher = manager.dispatcher();
        let addr = config.gateway.addr;
        Some(tokio::spawn(gateway::serve(addr, dispatcher)))
    } else {
        None
    };

    // ── Run until interrupted ──
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    sweep.abort();
    if let Some(task) = gateway_task {
        task.abort();
    }
    admin_task.abort();
    manager.shutdown().await;

    Ok(())
}

async fn open_store(config: &StratoConfig) -> anyhow::Result<Arc<PluginStore>> {
    match config.store.mode {
        StoreMode::Standalone => {
            info!(path = %config.store.state_file.display(), "Opening standalone record store");
            Ok(Arc::new(PluginStore::standalone(&config.store.state_file)?))
        }
        #[cfg(feature = "etcd")]
        StoreMode::Etcd => {
            info!(endpoints = ?config.store.etcd.endpoints, "Connecting to etcd record store");
            Ok(Arc::new(
                PluginStore::etcd(&config.store.etcd.endpoints, &config.store.etcd.prefix).await?,
            ))
        }
        #[cfg(not(feature = "etcd"))]
        StoreMode::Etcd => {
            anyhow::bail!("store.mode = etcd requires building with the `etcd` feature")
        }
    }
}
