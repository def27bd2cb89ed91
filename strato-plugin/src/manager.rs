//! The lifecycle manager: the intent-level facade the admin surface and
//! host binary drive.
//!
//! Commit ordering on enable/disable keeps the record store from ever
//! contradicting the loader and chain: the `enabled` flag is persisted
//! last in both directions, so an aborted operation leaves a state from
//! which a retry converges.

use crate::chain::{MiddlewareChain, ReloadReport};
use crate::dispatch::Dispatcher;
use crate::loader::{noop_handler, BuiltinCatalog, PluginLoader, BUILTIN_SCHEME};
use crate::middleware::Middleware;
use crate::observe::{self, ObservedMiddleware, TestRequest, TestResult};
use crate::snapshot::{ConfigSnapshot, SnapshotManager};
use crate::upload::{ensure_live, UploadMeta, Uploader};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strato_core::config::PluginHostConfig;
use strato_core::record::{PluginRecord, RecordStatus};
use strato_core::{Phase, RoutePattern, StratoError};
use strato_observability::{
    health, HealthState, HealthStatus, HealthThresholds, MetricsCollector, MetricsRegistry,
    MetricsSnapshot,
};
use strato_store::{BlobStore, PluginStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome of a bulk enable/disable.
#[derive(Debug, Default, Serialize)]
pub struct BulkReport {
    pub succeeded: usize,
    pub errors: Vec<String>,
    pub total: usize,
}

/// Host-wide summary counts.
#[derive(Debug, Serialize)]
pub struct HostStats {
    pub total_plugins: usize,
    pub enabled: usize,
    pub loaded: usize,
    pub chain_entries: usize,
    pub snapshots: usize,
    pub by_status: BTreeMap<String, usize>,
}

pub struct PluginManager {
    store: Arc<PluginStore>,
    blobs: Arc<BlobStore>,
    loader: PluginLoader,
    chain: Arc<MiddlewareChain>,
    registry: Arc<MetricsRegistry>,
    snapshots: SnapshotManager,
    uploader: Uploader,
    thresholds: HealthThresholds,
    collector: Option<Arc<MetricsCollector>>,
    config: PluginHostConfig,
}

impl PluginManager {
    pub fn new(
        config: PluginHostConfig,
        store: Arc<PluginStore>,
        blobs: Arc<BlobStore>,
        builtins: BuiltinCatalog,
        collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let uploader = Uploader::new(
            Arc::clone(&store),
            Arc::clone(&blobs),
            &config.staging_dir,
            config.max_upload_size,
            config.priority_max,
        );
        let thresholds = HealthThresholds {
            error_rate_unhealthy: config.error_rate_unhealthy,
            error_rate_degraded: config.error_rate_degraded,
            consecutive_errors_degraded: config.consecutive_errors_degraded,
            slow_response_degraded: Duration::from_millis(config.slow_response_degraded_ms),
        };
        Self {
            store,
            blobs,
            loader: PluginLoader::new(builtins, Duration::from_millis(config.init_timeout_ms)),
            chain: Arc::new(MiddlewareChain::new(config.priority_max)),
            registry: Arc::new(MetricsRegistry::new()),
            snapshots: SnapshotManager::new(config.snapshot_max),
            uploader,
            thresholds,
            collector,
            config,
        }
    }

    pub fn chain(&self) -> &Arc<MiddlewareChain> {
        &self.chain
    }

    pub fn store(&self) -> &Arc<PluginStore> {
        &self.store
    }

    pub fn metrics_registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.collector.as_ref()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.chain))
    }

    // ── Upload ───────────────────────────────────────────────

    pub async fn upload(
        &self,
        meta: UploadMeta,
        content: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        let result = self.uploader.upload(meta, content, cancel).await;
        if let Some(collector) = &self.collector {
            let outcome = match &result {
                Ok(_) => "committed",
                Err(StratoError::Validation(_)) => "rejected",
                Err(_) => "failed",
            };
            collector.uploads_total.with_label_values(&[outcome]).inc();
        }
        result
    }

    // ── Enable / disable ─────────────────────────────────────

    /// Load (if needed), register, then persist `enabled = true` last.
    pub async fn enable(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        let record = self.store.get(name)?;

        let mut freshly_loaded = false;
        if !self.chain.contains(name) {
            let was_loaded = self.loader.is_loaded(name).await;
            let middleware = match self.ensure_loaded(&record).await {
                Ok(mw) => mw,
                Err(e) => {
                    self.note_error(name, &e).await;
                    return Err(e);
                }
            };
            let observed = self.observe(name, record.phase, middleware);
            if let Err(e) = self.chain.register(
                name,
                observed,
                record.priority,
                record.routes.clone(),
                record.phase,
            ) {
                if !was_loaded {
                    self.loader.unload(name).await;
                }
                self.note_error(name, &e).await;
                return Err(e);
            }
            freshly_loaded = !was_loaded;
        }

        ensure_live(cancel)?;
        let updated = self
            .store
            .update(name, |r| {
                r.enabled = true;
                r.status = RecordStatus::Active;
                r.last_enabled_at = Some(chrono::Utc::now());
                r.error_message = None;
                if freshly_loaded {
                    r.usage_count += 1;
                }
            })
            .await?;
        self.sync_gauges().await;
        info!(plugin = name, "Plugin enabled");
        Ok(updated)
    }

    /// Unregister, unload, then persist `enabled = false` last.
    pub async fn disable(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        self.store.get(name)?;

        self.chain.unregister(name);
        self.loader.unload(name).await;

        let updated = self.store.set_enabled(name, false).await?;
        self.sync_gauges().await;
        info!(plugin = name, "Plugin disabled");
        Ok(updated)
    }

    /// Remove the plugin entirely: chain entry, instance, record, blob,
    /// metrics, snapshots.
    pub async fn delete(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;

        self.chain.unregister(name);
        self.loader.unload(name).await;

        let record = self.store.delete(name).await?;
        if !record.binary_ref.starts_with(BUILTIN_SCHEME) {
            match self.blobs.delete(&record.binary_ref) {
                Ok(_) => {}
                Err(e) => warn!(plugin = name, error = %e, "Blob removal failed during delete"),
            }
        }
        self.registry.remove(name);
        self.snapshots.clear(name);
        self.sync_gauges().await;
        info!(plugin = name, "Plugin deleted");
        Ok(record)
    }

    // ── Chain attachment without touching `enabled` ──────────

    /// Load and register, leaving the stored `enabled` flag alone.
    pub async fn register(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StratoError> {
        ensure_live(cancel)?;
        let record = self.store.get(name)?;
        if self.chain.contains(name) {
            return Err(StratoError::Conflict(format!(
                "middleware {name} is already registered"
            )));
        }
        let middleware = self.ensure_loaded(&record).await?;
        let observed = self.observe(name, record.phase, middleware);
        self.chain.register(
            name,
            observed,
            record.priority,
            record.routes.clone(),
            record.phase,
        )?;
        self.sync_gauges().await;
        Ok(())
    }

    /// Drop the chain entry and instance, leaving the record alone.
    pub async fn unregister(&self, name: &str) -> bool {
        let present = self.chain.unregister(name);
        self.loader.unload(name).await;
        self.sync_gauges().await;
        present
    }

    // ── Targeted mutations (record first, chain second) ──────

    pub async fn set_priority(
        &self,
        name: &str,
        priority: u32,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        self.check_priority(priority)?;
        let updated = self.store.set_priority(name, priority).await?;
        if self.chain.contains(name) {
            self.chain
                .update(name, priority, updated.routes.clone(), updated.phase)?;
        }
        Ok(updated)
    }

    pub async fn set_routes(
        &self,
        name: &str,
        routes: Vec<RoutePattern>,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        let updated = self.store.set_routes(name, routes).await?;
        if self.chain.contains(name) {
            self.chain.set_routes(name, updated.routes.clone())?;
        }
        Ok(updated)
    }

    pub async fn set_phase(
        &self,
        name: &str,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        let updated = self.store.set_phase(name, phase).await?;
        if self.chain.contains(name) {
            self.chain.set_phase(name, phase)?;
        }
        Ok(updated)
    }

    /// Persist a new config mapping. A loaded instance keeps its
    /// construction-time config until the next load.
    pub async fn update_config(
        &self,
        name: &str,
        config: serde_json::Map<String, serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        self.store.set_config(name, config).await
    }

    /// Bulk priority update. Record-store updates are applied first and
    /// stop at the first failing name (already-applied updates are kept);
    /// chain updates follow for the entries currently registered.
    pub async fn reorder(
        &self,
        updates: &[(String, u32)],
        cancel: &CancellationToken,
    ) -> Result<usize, StratoError> {
        ensure_live(cancel)?;

        let mut persisted: Vec<(String, u32)> = Vec::new();
        let mut failure: Option<StratoError> = None;
        for (name, priority) in updates {
            if let Err(e) = self.check_priority(*priority) {
                failure = Some(e);
                break;
            }
            match self.store.set_priority(name, *priority).await {
                Ok(_) => persisted.push((name.clone(), *priority)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let chained: Vec<(String, u32)> = persisted
            .iter()
            .filter(|(name, _)| self.chain.contains(name))
            .cloned()
            .collect();
        if !chained.is_empty() {
            self.chain.reorder(&chained)?;
        }

        match failure {
            Some(e) => Err(StratoError::InvalidArgument(format!(
                "reorder stopped after {} update(s): {e}",
                persisted.len()
            ))),
            None => Ok(persisted.len()),
        }
    }

    /// Rebuild the chain from the stored enabled set: unregister-all,
    /// then load and register each record. Per-record errors are counted
    /// and reported, never fatal.
    pub async fn reload_all(&self, cancel: &CancellationToken) -> ReloadReport {
        let records = self.store.list_enabled_sorted_by_priority();
        let mut report = ReloadReport {
            total: records.len(),
            ..Default::default()
        };

        self.chain.clear();
        for record in records {
            if let Err(e) = ensure_live(cancel) {
                report
                    .errors
                    .push(format!("{}: {e}", record.name));
                continue;
            }
            match self.ensure_loaded(&record).await {
                Ok(middleware) => {
                    let observed = self.observe(&record.name, record.phase, middleware);
                    match self.chain.register(
                        &record.name,
                        observed,
                        record.priority,
                        record.routes.clone(),
                        record.phase,
                    ) {
                        Ok(()) => report.reloaded += 1,
                        Err(e) => report.errors.push(format!("{}: {e}", record.name)),
                    }
                }
                Err(e) => {
                    self.note_error(&record.name, &e).await;
                    report.errors.push(format!("{}: {e}", record.name));
                }
            }
        }

        self.sync_gauges().await;
        info!(
            reloaded = report.reloaded,
            errors = report.errors.len(),
            total = report.total,
            "Reload complete"
        );
        report
    }

    pub async fn enable_all(&self, cancel: &CancellationToken) -> BulkReport {
        let records = self.store.list_all();
        let mut report = BulkReport {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match self.enable(&record.name, cancel).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => report.errors.push(format!("{}: {e}", record.name)),
            }
        }
        report
    }

    pub async fn disable_all(&self, cancel: &CancellationToken) -> BulkReport {
        let records = self.store.list_all();
        let mut report = BulkReport {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match self.disable(&record.name, cancel).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => report.errors.push(format!("{}: {e}", record.name)),
            }
        }
        report
    }

    // ── Observation ──────────────────────────────────────────

    /// Dry-run a synthetic request through one loaded instance, without
    /// touching the chain.
    pub async fn test(&self, name: &str, fixture: TestRequest) -> Result<TestResult, StratoError> {
        self.store.get(name)?;
        let middleware = self.loader.get(name).await.ok_or_else(|| {
            StratoError::InvalidArgument(format!("plugin {name} is not loaded"))
        })?;
        Ok(observe::run_test(name, &middleware, fixture).await)
    }

    pub fn health(&self, name: &str) -> Result<HealthStatus, StratoError> {
        self.store.get(name)?;
        let metrics = self.registry.get(name).unwrap_or_default();
        Ok(health::classify(&metrics, &self.thresholds))
    }

    pub fn metrics(&self, name: &str) -> Result<MetricsSnapshot, StratoError> {
        self.store.get(name)?;
        let metrics = self.registry.get(name).unwrap_or_default();
        Ok(MetricsSnapshot::from(&metrics))
    }

    pub fn metrics_all(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.registry.snapshot_all()
    }

    // ── Snapshots & rollback ─────────────────────────────────

    pub async fn snapshot(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ConfigSnapshot, StratoError> {
        ensure_live(cancel)?;
        let record = self.store.get(name)?;
        Ok(self.snapshots.snapshot(&record))
    }

    /// Snapshot every plugin currently in the chain.
    pub fn snapshot_all(&self) -> usize {
        let mut taken = 0;
        for entry in self.chain.list() {
            if let Ok(record) = self.store.get(&entry.name) {
                self.snapshots.snapshot(&record);
                taken += 1;
            }
        }
        taken
    }

    pub fn list_snapshots(&self, name: &str) -> Result<Vec<ConfigSnapshot>, StratoError> {
        self.store.get(name)?;
        Ok(self.snapshots.list(name))
    }

    pub async fn rollback(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        let record = self.store.get(name)?;
        let target = self.snapshots.take_rollback_target(&record)?;
        let restored = self.apply_snapshot(target, cancel).await?;
        self.count_rollback("manual");
        Ok(restored)
    }

    pub async fn rollback_to(
        &self,
        name: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        self.store.get(name)?;
        let target = self.snapshots.take_rollback_target_at(name, timestamp)?;
        let restored = self.apply_snapshot(target, cancel).await?;
        self.count_rollback("manual");
        Ok(restored)
    }

    /// Best-effort rollback when the observer reports sustained failure.
    /// Returns whether a rollback was performed.
    pub async fn auto_rollback(&self, name: &str, threshold: u64) -> bool {
        let consecutive = self.registry.consecutive_errors(name);
        if consecutive < threshold {
            return false;
        }
        let metrics = self.registry.get(name).unwrap_or_default();
        let status = health::classify(&metrics, &self.thresholds);
        if status.state != HealthState::Unhealthy {
            return false;
        }

        warn!(
            plugin = name,
            consecutive, "Plugin unhealthy past threshold, attempting rollback"
        );
        match self.rollback_inner(name).await {
            Ok(_) => {
                self.count_rollback("auto");
                true
            }
            Err(e) => {
                error!(plugin = name, error = %e, "Auto-rollback failed");
                false
            }
        }
    }

    async fn rollback_inner(&self, name: &str) -> Result<PluginRecord, StratoError> {
        let record = self.store.get(name)?;
        let target = self.snapshots.take_rollback_target(&record)?;
        self.apply_snapshot(target, &CancellationToken::new()).await
    }

    /// Persist a snapshot's fields and reconcile loader + chain with the
    /// restored state.
    async fn apply_snapshot(
        &self,
        target: ConfigSnapshot,
        cancel: &CancellationToken,
    ) -> Result<PluginRecord, StratoError> {
        ensure_live(cancel)?;
        let name = target.name.clone();
        let updated = self
            .store
            .update(&name, |r| {
                target.apply_to(r);
                r.status = if r.enabled {
                    RecordStatus::Active
                } else {
                    RecordStatus::Disabled
                };
            })
            .await?;

        if updated.enabled {
            if self.chain.contains(&name) {
                self.chain
                    .update(&name, updated.priority, updated.routes.clone(), updated.phase)?;
            } else {
                let middleware = self.ensure_loaded(&updated).await?;
                let observed = self.observe(&name, updated.phase, middleware);
                self.chain.register(
                    &name,
                    observed,
                    updated.priority,
                    updated.routes.clone(),
                    updated.phase,
                )?;
            }
        } else if self.chain.contains(&name) {
            self.chain.unregister(&name);
            self.loader.unload(&name).await;
        }

        self.sync_gauges().await;
        info!(plugin = %name, priority = updated.priority, "Rollback applied");
        Ok(updated)
    }

    // ── Health sweep ─────────────────────────────────────────

    /// Probe every chain entry once and fire auto-rollback where
    /// configured.
    pub async fn run_health_sweep(&self) {
        for entry in self.chain.list() {
            let Some(middleware) = self.loader.get(&entry.name).await else {
                continue;
            };
            let handler = middleware.wrap(noop_handler(200));
            let start = std::time::Instant::now();
            let probe = crate::context::RequestContext::get("/");
            let result = handler(probe).await;
            let elapsed = start.elapsed();
            self.registry.record_probe(&entry.name, elapsed);
            if let Err(e) = result {
                tracing::debug!(plugin = %entry.name, error = %e, "Probe returned error");
            }

            if self.config.auto_rollback.enabled {
                self.auto_rollback(&entry.name, self.config.auto_rollback.threshold)
                    .await;
            }
        }
    }

    /// Spawn the periodic health sweep.
    pub fn start_health_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = Duration::from_secs(self.config.health_check_interval_secs.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                manager.run_health_sweep().await;
            }
        })
    }

    // ── Stats & shutdown ─────────────────────────────────────

    pub async fn stats(&self) -> HostStats {
        let records = self.store.list_all();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            *by_status.entry(record.status.to_string()).or_default() += 1;
        }
        HostStats {
            total_plugins: records.len(),
            enabled: records.iter().filter(|r| r.enabled).count(),
            loaded: self.loader.len().await,
            chain_entries: self.chain.len(),
            snapshots: self.snapshots.total(),
            by_status,
        }
    }

    /// Tear down the chain and every instance. Records are left as they
    /// are so the next boot re-enables the same set.
    pub async fn shutdown(&self) {
        let removed = self.chain.clear();
        self.loader.unload_all().await;
        self.sync_gauges().await;
        info!(chain_entries = removed, "Plugin host shut down");
    }

    // ── Internals ────────────────────────────────────────────

    fn check_priority(&self, priority: u32) -> Result<(), StratoError> {
        if priority > self.config.priority_max {
            return Err(StratoError::InvalidArgument(format!(
                "priority {priority} out of range 0..={}",
                self.config.priority_max
            )));
        }
        Ok(())
    }

    async fn ensure_loaded(
        &self,
        record: &PluginRecord,
    ) -> Result<Arc<dyn Middleware>, StratoError> {
        if let Some(middleware) = self.loader.get(&record.name).await {
            return Ok(middleware);
        }
        let artifact = if record.binary_ref.starts_with(BUILTIN_SCHEME) {
            None
        } else {
            Some(self.fetch_artifact(record).await?)
        };
        self.loader.load(record, artifact).await
    }

    /// Resolve the record's blob to a local path, under the configured
    /// fetch deadline.
    async fn fetch_artifact(&self, record: &PluginRecord) -> Result<std::path::PathBuf, StratoError> {
        let blobs = Arc::clone(&self.blobs);
        let reference = record.binary_ref.clone();
        let fetch = tokio::task::spawn_blocking(move || blobs.path_for(&reference));
        let deadline = Duration::from_millis(self.config.blob_fetch_timeout_ms.max(1));
        match tokio::time::timeout(deadline, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StratoError::Internal(format!("blob fetch task failed: {join}"))),
            Err(_) => Err(StratoError::DeadlineExceeded(format!(
                "blob fetch for {} exceeded {deadline:?}",
                record.name
            ))),
        }
    }

    fn observe(
        &self,
        name: &str,
        phase: Phase,
        middleware: Arc<dyn Middleware>,
    ) -> Arc<dyn Middleware> {
        Arc::new(ObservedMiddleware::new(
            name,
            phase,
            middleware,
            Arc::clone(&self.registry),
            self.collector.clone(),
        ))
    }

    async fn note_error(&self, name: &str, error: &StratoError) {
        if let Err(e) = self.store.set_error(name, error.to_string()).await {
            warn!(plugin = name, error = %e, "Failed to record plugin error state");
        }
    }

    fn count_rollback(&self, trigger: &str) {
        if let Some(collector) = &self.collector {
            collector
                .rollbacks_total
                .with_label_values(&[trigger])
                .inc();
        }
    }

    async fn sync_gauges(&self) {
        if let Some(collector) = &self.collector {
            collector.chain_entries.set(self.chain.len() as i64);
            collector.loaded_plugins.set(self.loader.len().await as i64);
        }
    }
}
