use crate::pattern::{self, RoutePattern};
use crate::phase::Phase;
use crate::StratoError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The authoritative durable entity describing one uploaded plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Unique plugin name
    pub name: String,

    /// Version string supplied at upload
    pub version: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Plugin author
    #[serde(default)]
    pub author: String,

    /// Who performed the upload
    #[serde(default)]
    pub uploaded_by: String,

    /// Durable blob handle (`blob:sha256-<hex>` or `builtin:<name>`)
    pub binary_ref: String,

    /// Original artifact filename
    #[serde(default)]
    pub filename: String,

    /// Artifact size in bytes
    #[serde(default)]
    pub file_size: u64,

    /// Content digest of the artifact (sha-256 hex)
    #[serde(default)]
    pub file_hash: String,

    /// Whether the plugin should be in the chain
    #[serde(default)]
    pub enabled: bool,

    /// Plugin configuration passed to the constructor
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,

    /// Chain position; lower runs earlier
    #[serde(default)]
    pub priority: u32,

    /// Route patterns this plugin applies to
    #[serde(default)]
    pub routes: Vec<RoutePattern>,

    /// Chain phase
    #[serde(default)]
    pub phase: Phase,

    /// Free-form tags
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Toolchain metadata extracted from the artifact
    #[serde(default)]
    pub build: ToolchainInfo,

    /// Lifecycle status
    #[serde(default)]
    pub status: RecordStatus,

    /// Last error, if status is Error
    #[serde(default)]
    pub error_message: Option<String>,

    /// Upload timestamp
    pub uploaded_at: chrono::DateTime<chrono::Utc>,

    /// Last update timestamp
    pub updated_at: chrono::DateTime<chrono::Utc>,

    /// When the plugin was last enabled
    #[serde(default)]
    pub last_enabled_at: Option<chrono::DateTime<chrono::Utc>>,

    /// How many times the plugin has been loaded into the chain
    #[serde(default)]
    pub usage_count: u64,
}

/// Toolchain metadata embedded in (or inferred from) the artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainInfo {
    #[serde(default)]
    pub build_version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

/// Record lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Stored but never enabled
    #[default]
    Uploaded,
    /// Enabled and loaded
    Active,
    /// Explicitly disabled
    Disabled,
    /// Last lifecycle operation failed
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Uploaded => "uploaded",
            RecordStatus::Active => "active",
            RecordStatus::Disabled => "disabled",
            RecordStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PluginRecord {
    /// A fresh, disabled record with normalized routes and current timestamps.
    pub fn new(name: impl Into<String>, version: impl Into<String>, binary_ref: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
            uploaded_by: String::new(),
            binary_ref: binary_ref.into(),
            filename: String::new(),
            file_size: 0,
            file_hash: String::new(),
            enabled: false,
            config: serde_json::Map::new(),
            priority: 0,
            routes: vec![RoutePattern::any()],
            phase: Phase::Unassigned,
            tags: BTreeSet::new(),
            build: ToolchainInfo::default(),
            status: RecordStatus::Uploaded,
            error_message: None,
            uploaded_at: now,
            updated_at: now,
            last_enabled_at: None,
            usage_count: 0,
        }
    }

    /// The plugin's config as a JSON value, for the constructor.
    pub fn config_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.config.clone())
    }

    /// Check record invariants against the host's configured bounds.
    pub fn validate(&self, priority_max: u32) -> Result<(), StratoError> {
        if self.name.is_empty() {
            return Err(StratoError::InvalidArgument("plugin name must not be empty".into()));
        }
        if self.priority > priority_max {
            return Err(StratoError::InvalidArgument(format!(
                "priority {} out of range 0..={priority_max}",
                self.priority
            )));
        }
        if self.status == RecordStatus::Active && !self.enabled {
            return Err(StratoError::InvalidArgument(format!(
                "plugin {} is active but not enabled",
                self.name
            )));
        }
        Ok(())
    }

    /// Default empty route lists to `["*"]`.
    pub fn normalize_routes(&mut self) {
        self.routes = pattern::normalize(std::mem::take(&mut self.routes));
    }

    /// True if any of the record's routes match the path.
    pub fn applies_to(&self, path: &str) -> bool {
        pattern::matches_any(&self.routes, path)
    }
}

/// Filter for record listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub status: Option<RecordStatus>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &PluginRecord) -> bool {
        if let Some(enabled) = self.enabled
            && record.enabled != enabled
        {
            return false;
        }
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(phase) = self.phase
            && record.phase != phase
        {
            return false;
        }
        if let Some(ref tag) = self.tag
            && !record.tags.contains(tag)
        {
            return false;
        }
        if let Some(ref prefix) = self.name_prefix
            && !record.name.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(ref route) = self.route
            && !record.applies_to(route)
        {
            return false;
        }
        true
    }
}
