use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Raw per-plugin counters. One of these exists for every plugin that has
/// ever been invoked or probed since host start.
#[derive(Debug, Clone, Default)]
pub struct PluginMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_latency: Duration,
    pub min_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub last_error: Option<String>,
    pub last_error_time: Option<chrono::DateTime<chrono::Utc>>,
    pub consecutive_errors: u64,
    pub last_probe_latency: Option<Duration>,
    pub last_probe_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PluginMetrics {
    fn record(&mut self, latency: Duration) {
        self.total_requests += 1;
        self.total_latency += latency;
        self.min_latency = Some(match self.min_latency {
            Some(min) => min.min(latency),
            None => latency,
        });
        self.max_latency = Some(match self.max_latency {
            Some(max) => max.max(latency),
            None => latency,
        });
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }
}

/// Read-only view of a plugin's metrics, as exposed by the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_error_time: Option<chrono::DateTime<chrono::Utc>>,
    pub consecutive_errors: u64,
    pub last_probe_ms: Option<f64>,
}

impl From<&PluginMetrics> for MetricsSnapshot {
    fn from(m: &PluginMetrics) -> Self {
        let avg_latency_ms = if m.total_requests == 0 {
            0.0
        } else {
            m.total_latency.as_secs_f64() * 1000.0 / m.total_requests as f64
        };
        Self {
            total_requests: m.total_requests,
            failed_requests: m.failed_requests,
            error_rate: m.error_rate(),
            avg_latency_ms,
            min_latency_ms: m.min_latency.map(|d| d.as_secs_f64() * 1000.0),
            max_latency_ms: m.max_latency.map(|d| d.as_secs_f64() * 1000.0),
            last_error: m.last_error.clone(),
            last_error_time: m.last_error_time,
            consecutive_errors: m.consecutive_errors,
            last_probe_ms: m.last_probe_latency.map(|d| d.as_secs_f64() * 1000.0),
        }
    }
}

/// Per-plugin metric records, keyed by plugin name.
///
/// Each record sits behind its own mutex; the map itself is only touched
/// on create and delete. Recording a request therefore never contends
/// across plugins.
pub struct MetricsRegistry {
    metrics: DashMap<String, Mutex<PluginMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
        }
    }

    fn with_record<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce(&mut PluginMetrics) -> R,
    {
        let entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Mutex::new(PluginMetrics::default()));
        let mut guard = match entry.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn record_success(&self, name: &str, latency: Duration) {
        self.with_record(name, |m| {
            m.record(latency);
            m.consecutive_errors = 0;
        });
    }

    pub fn record_failure(&self, name: &str, latency: Duration, error: &str) {
        self.with_record(name, |m| {
            m.record(latency);
            m.failed_requests += 1;
            m.consecutive_errors += 1;
            m.last_error = Some(error.to_string());
            m.last_error_time = Some(chrono::Utc::now());
        });
    }

    pub fn record_probe(&self, name: &str, latency: Duration) {
        self.with_record(name, |m| {
            m.last_probe_latency = Some(latency);
            m.last_probe_at = Some(chrono::Utc::now());
        });
    }

    pub fn consecutive_errors(&self, name: &str) -> u64 {
        self.metrics
            .get(name)
            .map(|e| match e.lock() {
                Ok(g) => g.consecutive_errors,
                Err(p) => p.into_inner().consecutive_errors,
            })
            .unwrap_or(0)
    }

    /// A copy of the raw record, if the plugin has one.
    pub fn get(&self, name: &str) -> Option<PluginMetrics> {
        self.metrics.get(name).map(|e| match e.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        })
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricsSnapshot> {
        self.get(name).map(|m| MetricsSnapshot::from(&m))
    }

    /// Snapshot for every tracked plugin, name-ordered.
    pub fn snapshot_all(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|e| {
                let m = match e.value().lock() {
                    Ok(g) => g.clone(),
                    Err(p) => p.into_inner().clone(),
                };
                (e.key().clone(), MetricsSnapshot::from(&m))
            })
            .collect()
    }

    /// Drop a plugin's record (on unregister/delete).
    pub fn remove(&self, name: &str) {
        if self.metrics.remove(name).is_some() {
            tracing::debug!(plugin = name, "Metrics record dropped");
        }
    }

    pub fn tracked(&self) -> Vec<String> {
        self.metrics.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
