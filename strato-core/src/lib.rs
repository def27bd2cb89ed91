pub mod config;
pub mod error;
pub mod pattern;
pub mod phase;
pub mod record;

pub use error::{StratoError, ValidationError};
pub use pattern::RoutePattern;
pub use phase::Phase;
pub use record::{PluginRecord, RecordFilter, RecordStatus, ToolchainInfo};
