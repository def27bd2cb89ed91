use thiserror::Error;

/// Unified error type for the Strato plugin host.
#[derive(Error, Debug)]
pub enum StratoError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dependency failure: {0}")]
    Dependency(String),

    #[error("Plugin fault in {plugin}: {message}")]
    PluginFault { plugin: String, message: String },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Internal: {0}")]
    Internal(String),
}

/// Why the validator rejected an artifact. The first failing check wins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("artifact is empty")]
    Empty,

    #[error("artifact is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("wrong artifact format: {0}")]
    WrongFormat(String),

    #[error("toolchain mismatch: artifact built with {artifact}, host built with {host}")]
    ToolchainMismatch { artifact: String, host: String },

    #[error("constructor symbol missing: {0}")]
    SymbolMissing(String),

    #[error("constructor signature mismatch: {0}")]
    SignatureWrong(String),

    #[error("security check rejected artifact: {0}")]
    SecurityReject(String),
}

impl StratoError {
    /// Convenience constructor for plugin-originated failures.
    pub fn plugin_fault(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        StratoError::PluginFault {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            StratoError::InvalidArgument(_) => 400,
            StratoError::NotFound(_) => 404,
            StratoError::Conflict(_) => 409,
            StratoError::Validation(_) => 422,
            StratoError::Dependency(_) => 502,
            StratoError::PluginFault { .. } => 500,
            StratoError::DeadlineExceeded(_) => 504,
            StratoError::Internal(_) => 500,
        }
    }

    /// JSON error body.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({
            "error": self.to_string(),
            "status": self.status_code(),
        })
        .to_string()
        .into_bytes()
    }
}

impl From<std::io::Error> for StratoError {
    fn from(e: std::io::Error) -> Self {
        StratoError::Dependency(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for StratoError {
    fn from(e: serde_json::Error) -> Self {
        StratoError::Internal(format!("serialization: {e}"))
    }
}
