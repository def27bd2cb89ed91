use crate::handlers;
use axum::extract::State;
use axum::routing::{delete, get, post, put};
use axum::Router as AxumRouter;
use std::sync::Arc;
use strato_core::config::AdminConfig;
use strato_plugin::PluginManager;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for the Admin API.
pub struct AdminState {
    pub manager: Arc<PluginManager>,
    pub api_key: Option<String>,
}

/// Build the Axum router with all admin routes.
pub fn build_admin_router(state: Arc<AdminState>) -> AxumRouter {
    let admin_api = AxumRouter::new()
        // Health
        .route("/health", get(handlers::health::health_check))
        // Plugins: lifecycle
        .route("/plugins", post(handlers::plugins::upload_plugin))
        .route("/plugins", get(handlers::plugins::list_plugins))
        .route("/plugins/metrics", get(handlers::observe::all_metrics))
        .route("/plugins/enable-all", post(handlers::plugins::enable_all))
        .route("/plugins/disable-all", post(handlers::plugins::disable_all))
        .route("/plugins/{name}", get(handlers::plugins::get_plugin))
        .route("/plugins/{name}", delete(handlers::plugins::delete_plugin))
        .route("/plugins/{name}/enable", post(handlers::plugins::enable_plugin))
        .route("/plugins/{name}/disable", post(handlers::plugins::disable_plugin))
        // Plugins: targeted mutations
        .route("/plugins/{name}/config", put(handlers::plugins::update_config))
        .route("/plugins/{name}/priority", put(handlers::plugins::set_priority))
        .route("/plugins/{name}/routes", put(handlers::plugins::set_routes))
        .route("/plugins/{name}/phase", put(handlers::plugins::set_phase))
        // Plugins: observation
        .route("/plugins/{name}/test", post(handlers::observe::test_plugin))
        .route("/plugins/{name}/health", get(handlers::observe::plugin_health))
        .route("/plugins/{name}/metrics", get(handlers::observe::plugin_metrics))
        // Plugins: snapshots
        .route("/plugins/snapshot-all", post(handlers::snapshots::snapshot_all))
        .route("/plugins/{name}/snapshot", post(handlers::snapshots::take_snapshot))
        .route("/plugins/{name}/rollback", post(handlers::snapshots::rollback))
        .route("/plugins/{name}/snapshots", get(handlers::snapshots::list_snapshots))
        // Chain
        .route("/chain", get(handlers::chain::list_chain))
        .route("/chain/reorder", post(handlers::chain::reorder))
        .route("/chain/reload", post(handlers::chain::reload_all))
        .route("/chain/register", post(handlers::chain::register))
        .route("/chain/unregister", post(handlers::chain::unregister))
        // Stats
        .route("/stats", get(handlers::health::stats));

    AxumRouter::new()
        .nest("/strato/admin", admin_api)
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            crate::middleware::api_key_auth,
        ))
        .layer(CorsLayer::permissive())
        // Artifact uploads run well past axum's default body cap; the
        // validator enforces the real limit.
        .layer(axum::extract::DefaultBodyLimit::max(64 * 1024 * 1024))
        .with_state(state)
}

/// Admin REST API server.
pub struct AdminServer {
    config: AdminConfig,
    state: Arc<AdminState>,
}

impl AdminServer {
    pub fn new(config: AdminConfig, manager: Arc<PluginManager>) -> Self {
        let state = Arc::new(AdminState {
            manager,
            api_key: config.api_key.clone(),
        });
        Self { config, state }
    }

    /// Start the admin API server.
    pub async fn start(self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("Admin API disabled");
            return Ok(());
        }

        let addr = self.config.addr;
        let app = build_admin_router(self.state);

        info!(addr = %addr, "Starting Admin API server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<AdminState>>) -> String {
    state
        .manager
        .collector()
        .map(|c| c.gather_text())
        .unwrap_or_default()
}
