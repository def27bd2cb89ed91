pub mod health;
pub mod metrics;

#[cfg(feature = "prometheus")]
pub mod collector;

pub use health::{HealthState, HealthStatus, HealthThresholds};
pub use metrics::{MetricsRegistry, MetricsSnapshot, PluginMetrics};

#[cfg(feature = "prometheus")]
pub use collector::MetricsCollector;
