use crate::metrics::PluginMetrics;
use serde::Serialize;
use std::time::Duration;

/// Derived health of one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub state: HealthState,
    /// Latency of the most recent synthetic probe, if one has run.
    pub response_time_ms: Option<f64>,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

/// Classification thresholds, sourced from host configuration.
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub error_rate_unhealthy: f64,
    pub error_rate_degraded: f64,
    pub consecutive_errors_degraded: u64,
    pub slow_response_degraded: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_unhealthy: 0.5,
            error_rate_degraded: 0.1,
            consecutive_errors_degraded: 5,
            slow_response_degraded: Duration::from_secs(1),
        }
    }
}

/// Classify a plugin's health from its metrics record.
pub fn classify(metrics: &PluginMetrics, thresholds: &HealthThresholds) -> HealthStatus {
    let error_rate = metrics.error_rate();
    let response_time_ms = metrics
        .last_probe_latency
        .map(|d| d.as_secs_f64() * 1000.0);
    let last_check = chrono::Utc::now();

    let (state, message) = if error_rate > thresholds.error_rate_unhealthy {
        (
            HealthState::Unhealthy,
            format!("error rate {:.0}% exceeds {:.0}%",
                error_rate * 100.0,
                thresholds.error_rate_unhealthy * 100.0),
        )
    } else if error_rate > thresholds.error_rate_degraded {
        (
            HealthState::Degraded,
            format!("error rate {:.0}% exceeds {:.0}%",
                error_rate * 100.0,
                thresholds.error_rate_degraded * 100.0),
        )
    } else if metrics.consecutive_errors >= thresholds.consecutive_errors_degraded {
        (
            HealthState::Degraded,
            format!("{} consecutive errors", metrics.consecutive_errors),
        )
    } else if let Some(probe) = metrics
        .last_probe_latency
        .filter(|d| *d > thresholds.slow_response_degraded)
    {
        (
            HealthState::Degraded,
            format!("probe took {:.0}ms", probe.as_secs_f64() * 1000.0),
        )
    } else {
        (HealthState::Healthy, "ok".to_string())
    };

    HealthStatus {
        state,
        response_time_ms,
        last_check,
        message,
    }
}
