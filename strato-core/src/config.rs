use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration for the Strato plugin host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratoConfig {
    /// Host node ID (auto-generated if not set)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Gateway listener configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Plugin host configuration
    #[serde(default)]
    pub plugins: PluginHostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin API listener address
    #[serde(default = "default_admin_addr")]
    pub addr: SocketAddr,

    /// Admin API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable Admin API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway listener address
    #[serde(default = "default_gateway_addr")]
    pub addr: SocketAddr,

    /// Enable the demo gateway listener
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persistence mode
    #[serde(default)]
    pub mode: StoreMode,

    /// State file used in standalone mode
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// etcd configuration (used when mode = etcd)
    #[serde(default)]
    pub etcd: EtcdConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// File-backed state, no external store required
    #[default]
    Standalone,
    /// etcd-backed records
    Etcd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// etcd endpoint addresses
    #[serde(default = "default_etcd_endpoints")]
    pub endpoints: Vec<String>,

    /// Key prefix for Strato data
    #[serde(default = "default_etcd_prefix")]
    pub prefix: String,

    /// Connection timeout (milliseconds)
    #[serde(default = "default_etcd_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHostConfig {
    /// Directory holding artifact blobs (content-addressed)
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,

    /// Directory for upload staging and load-time artifact copies
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Maximum artifact size in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Highest accepted priority (inclusive)
    #[serde(default = "default_priority_max")]
    pub priority_max: u32,

    /// Bound on per-plugin snapshot history
    #[serde(default = "default_snapshot_max")]
    pub snapshot_max: usize,

    /// Health sweep period (seconds)
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,

    /// Error rate above which a plugin is unhealthy
    #[serde(default = "default_error_rate_unhealthy")]
    pub error_rate_unhealthy: f64,

    /// Error rate above which a plugin is degraded
    #[serde(default = "default_error_rate_degraded")]
    pub error_rate_degraded: f64,

    /// Consecutive errors at which a plugin is degraded
    #[serde(default = "default_consecutive_errors_degraded")]
    pub consecutive_errors_degraded: u64,

    /// Probe latency (milliseconds) above which a plugin is degraded
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_degraded_ms: u64,

    /// Timeout for fetching an artifact from the blob store (milliseconds)
    #[serde(default = "default_blob_fetch_timeout")]
    pub blob_fetch_timeout_ms: u64,

    /// Timeout for plugin construction + initialization (milliseconds)
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,

    /// Automatic rollback of misbehaving plugins
    #[serde(default)]
    pub auto_rollback: AutoRollbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRollbackConfig {
    /// Enable the auto-rollback hook in the health sweep
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive-error threshold that triggers rollback
    #[serde(default = "default_auto_rollback_threshold")]
    pub threshold: u64,
}

impl StratoConfig {
    /// Load configuration from YAML file + environment variables.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["strato.yaml", "/etc/strato/strato.yaml", "config/strato.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        // Environment variables override: STRATO_ADMIN__ADDR, etc.
        figment = figment.merge(Env::prefixed("STRATO_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

// Default implementations

impl Default for StratoConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            admin: AdminConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            plugins: PluginHostConfig::default(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
            api_key: None,
            enabled: true,
            cors_origins: vec![],
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: default_gateway_addr(),
            enabled: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::Standalone,
            state_file: default_state_file(),
            etcd: EtcdConfig::default(),
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_etcd_endpoints(),
            prefix: default_etcd_prefix(),
            timeout_ms: default_etcd_timeout(),
        }
    }
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            staging_dir: default_staging_dir(),
            max_upload_size: default_max_upload_size(),
            priority_max: default_priority_max(),
            snapshot_max: default_snapshot_max(),
            health_check_interval_secs: default_health_interval(),
            error_rate_unhealthy: default_error_rate_unhealthy(),
            error_rate_degraded: default_error_rate_degraded(),
            consecutive_errors_degraded: default_consecutive_errors_degraded(),
            slow_response_degraded_ms: default_slow_response_ms(),
            blob_fetch_timeout_ms: default_blob_fetch_timeout(),
            init_timeout_ms: default_init_timeout(),
            auto_rollback: AutoRollbackConfig::default(),
        }
    }
}

impl Default for AutoRollbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_auto_rollback_threshold(),
        }
    }
}

// Serde default functions

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:9180".parse().unwrap()
}

fn default_gateway_addr() -> SocketAddr {
    "0.0.0.0:9080".parse().unwrap()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/strato-plugins.json")
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_etcd_prefix() -> String {
    "/strato".to_string()
}

fn default_etcd_timeout() -> u64 {
    5000
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("data/blobs")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_max_upload_size() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

fn default_priority_max() -> u32 {
    1000
}

fn default_snapshot_max() -> usize {
    10
}

fn default_health_interval() -> u64 {
    30
}

fn default_error_rate_unhealthy() -> f64 {
    0.5
}

fn default_error_rate_degraded() -> f64 {
    0.1
}

fn default_consecutive_errors_degraded() -> u64 {
    5
}

fn default_slow_response_ms() -> u64 {
    1000
}

fn default_blob_fetch_timeout() -> u64 {
    5000
}

fn default_init_timeout() -> u64 {
    5000
}

fn default_auto_rollback_threshold() -> u64 {
    5
}

fn default_true() -> bool {
    true
}
