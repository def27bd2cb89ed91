pub mod chain;
pub mod context;
pub mod dispatch;
pub mod loader;
pub mod manager;
pub mod middleware;
pub mod observe;
pub mod snapshot;
pub mod upload;
pub mod validate;

pub use chain::{ChainEntryInfo, MiddlewareChain, ReloadReport};
pub use context::{Handler, HandlerFuture, RequestContext, Response};
pub use dispatch::Dispatcher;
pub use loader::{noop_handler, BuiltinCatalog, PluginLoader, BUILTIN_SCHEME};
pub use manager::{BulkReport, HostStats, PluginManager};
pub use middleware::{Middleware, MiddlewareDeclaration};
pub use observe::{ObservedMiddleware, TestRequest, TestResult};
pub use snapshot::{ConfigSnapshot, SnapshotManager};
pub use upload::{UploadMeta, Uploader};
