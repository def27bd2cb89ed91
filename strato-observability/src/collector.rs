use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for the plugin host.
///
/// Complements the per-plugin [`MetricsRegistry`](crate::MetricsRegistry):
/// the registry feeds health classification and the admin metrics API,
/// while this collector exposes the same events in Prometheus text
/// exposition for scraping.
pub struct MetricsCollector {
    registry: Registry,

    /// Plugin invocations by plugin and outcome (ok / error)
    pub plugin_requests_total: IntCounterVec,

    /// Plugin execution time histogram by plugin and phase
    pub plugin_execution_seconds: HistogramVec,

    /// Number of entries currently in the chain
    pub chain_entries: IntGauge,

    /// Number of loaded plugin instances
    pub loaded_plugins: IntGauge,

    /// Artifact uploads by outcome (committed / rejected / failed)
    pub uploads_total: IntCounterVec,

    /// Rollbacks by trigger (manual / auto)
    pub rollbacks_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let plugin_requests_total = IntCounterVec::new(
            Opts::new("strato_plugin_requests_total", "Plugin invocations").namespace("strato"),
            &["plugin", "outcome"],
        )?;

        let plugin_execution_seconds = HistogramVec::new(
            HistogramOpts::new("strato_plugin_execution_seconds", "Plugin execution time")
                .namespace("strato")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["plugin", "phase"],
        )?;

        let chain_entries = IntGauge::new("strato_chain_entries", "Entries in the middleware chain")?;

        let loaded_plugins = IntGauge::new("strato_loaded_plugins", "Loaded plugin instances")?;

        let uploads_total = IntCounterVec::new(
            Opts::new("strato_uploads_total", "Artifact uploads").namespace("strato"),
            &["outcome"],
        )?;

        let rollbacks_total = IntCounterVec::new(
            Opts::new("strato_rollbacks_total", "Plugin rollbacks").namespace("strato"),
            &["trigger"],
        )?;

        registry.register(Box::new(plugin_requests_total.clone()))?;
        registry.register(Box::new(plugin_execution_seconds.clone()))?;
        registry.register(Box::new(chain_entries.clone()))?;
        registry.register(Box::new(loaded_plugins.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        Ok(Self {
            registry,
            plugin_requests_total,
            plugin_execution_seconds,
            chain_entries,
            loaded_plugins,
            uploads_total,
            rollbacks_total,
        })
    }

    /// Record one plugin invocation.
    pub fn record_invocation(&self, plugin: &str, phase: &str, ok: bool, duration_secs: f64) {
        let outcome = if ok { "ok" } else { "error" };
        self.plugin_requests_total
            .with_label_values(&[plugin, outcome])
            .inc();
        self.plugin_execution_seconds
            .with_label_values(&[plugin, phase])
            .observe(duration_secs);
    }

    /// Get Prometheus text exposition.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metrics = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metrics, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics collector")
    }
}
