//! Materializes stored artifacts into live middleware instances.
//!
//! The loader owns the process-wide table of loaded instances. Loading is
//! single-writer per name: the table mutex is held across the linker
//! operations, which the platform serializes anyway. Library images are
//! never unmapped once loaded: `unload` only disposes the logical
//! instance and its table entry; residual linker memory is accepted.

use crate::context::Handler;
use crate::middleware::{
    Middleware, MiddlewareDeclaration, ABI_VERSION, DECLARATION_SYMBOL, RUSTC_VERSION,
};
use dashmap::DashMap;
use libloading::Library;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strato_core::record::PluginRecord;
use strato_core::{StratoError, ValidationError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Scheme prefix shared with the blob store for builtin references.
pub const BUILTIN_SCHEME: &str = "builtin:";

/// Constructor for a middleware compiled into the host binary.
pub type BuiltinConstructor = fn(&serde_json::Value) -> Result<Box<dyn Middleware>, String>;

/// In-process middlewares, addressed as `builtin:<name>`.
///
/// These follow the same constructor contract as external artifacts but
/// skip the linker entirely.
pub struct BuiltinCatalog {
    constructors: DashMap<String, BuiltinConstructor>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    pub fn register(&self, name: &str, constructor: BuiltinConstructor) {
        debug!(builtin = name, "Registering builtin middleware");
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinConstructor> {
        self.constructors.get(name).map(|c| *c.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.constructors.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// A live middleware instance.
pub struct LoadedInstance {
    pub name: String,
    pub middleware: Arc<dyn Middleware>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

pub struct PluginLoader {
    table: Mutex<HashMap<String, LoadedInstance>>,
    builtins: BuiltinCatalog,
    init_timeout: Duration,
}

impl PluginLoader {
    pub fn new(builtins: BuiltinCatalog, init_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            builtins,
            init_timeout,
        }
    }

    pub fn builtins(&self) -> &BuiltinCatalog {
        &self.builtins
    }

    /// Materialize an instance for `record`.
    ///
    /// `artifact` is the on-disk location of the fetched blob; `None` for
    /// builtin references. Fails if the name is already loaded, if symbol
    /// resolution fails, or if construction/initialization errors. A
    /// failed load leaves no table entry behind.
    pub async fn load(
        &self,
        record: &PluginRecord,
        artifact: Option<PathBuf>,
    ) -> Result<Arc<dyn Middleware>, StratoError> {
        let mut table = self.table.lock().await;
        if table.contains_key(&record.name) {
            return Err(StratoError::Conflict(format!(
                "plugin {} is already loaded",
                record.name
            )));
        }

        let config = record.config_value();
        let constructed = if let Some(builtin) = record.binary_ref.strip_prefix(BUILTIN_SCHEME) {
            let constructor = self.builtins.get(builtin).ok_or_else(|| {
                StratoError::NotFound(format!("builtin middleware {builtin}"))
            })?;
            let plugin = record.name.clone();
            self.construct_with_timeout(&record.name, move || {
                let middleware = constructor(&config).map_err(|msg| {
                    StratoError::plugin_fault(plugin.clone(), format!("constructor: {msg}"))
                })?;
                middleware.initialize(&config)?;
                Ok(middleware)
            })
            .await?
        } else {
            let path = artifact.ok_or_else(|| {
                StratoError::Internal(format!(
                    "no artifact path supplied for {}",
                    record.binary_ref
                ))
            })?;
            let name = record.name.clone();
            self.construct_with_timeout(&record.name, move || {
                construct_from_library(&name, &path, &config)
            })
            .await?
        };

        info!(
            plugin = %record.name,
            version = %record.version,
            binary_ref = %record.binary_ref,
            "Plugin loaded"
        );

        let middleware: Arc<dyn Middleware> = Arc::from(constructed);
        table.insert(
            record.name.clone(),
            LoadedInstance {
                name: record.name.clone(),
                middleware: Arc::clone(&middleware),
                loaded_at: chrono::Utc::now(),
            },
        );
        Ok(middleware)
    }

    /// Run construction + initialization on the blocking pool under the
    /// configured deadline. The plugin cannot be interrupted once entered;
    /// on timeout the instance is abandoned.
    async fn construct_with_timeout<F>(
        &self,
        name: &str,
        build: F,
    ) -> Result<Box<dyn Middleware>, StratoError>
    where
        F: FnOnce() -> Result<Box<dyn Middleware>, StratoError> + Send + 'static,
    {
        let plugin = name.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(build));
            match result {
                Ok(inner) => inner,
                Err(_) => Err(StratoError::plugin_fault(
                    plugin,
                    "constructor or initialize panicked",
                )),
            }
        });

        match tokio::time::timeout(self.init_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StratoError::Internal(format!("loader task failed: {join}"))),
            Err(_) => Err(StratoError::DeadlineExceeded(format!(
                "initialization of {name} exceeded {:?}",
                self.init_timeout
            ))),
        }
    }

    /// Dispose the logical instance. Cleanup errors are logged but never
    /// prevent removal; unloading an unknown name is a no-op.
    pub async fn unload(&self, name: &str) -> bool {
        let removed = self.table.lock().await.remove(name);
        match removed {
            Some(instance) => {
                if let Err(e) = instance.middleware.cleanup() {
                    warn!(plugin = name, error = %e, "Cleanup failed during unload");
                }
                info!(plugin = name, "Plugin unloaded");
                true
            }
            None => {
                debug!(plugin = name, "Unload of plugin that is not loaded");
                false
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.table
            .lock()
            .await
            .get(name)
            .map(|i| Arc::clone(&i.middleware))
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.table.lock().await.contains_key(name)
    }

    pub async fn loaded(&self) -> Vec<String> {
        self.table.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Unload everything, for shutdown.
    pub async fn unload_all(&self) {
        let instances: Vec<LoadedInstance> = {
            let mut table = self.table.lock().await;
            table.drain().map(|(_, v)| v).collect()
        };
        for instance in instances {
            if let Err(e) = instance.middleware.cleanup() {
                warn!(plugin = %instance.name, error = %e, "Cleanup failed during shutdown");
            }
        }
    }
}

/// The unsafe core: map the library, resolve the declaration, verify both
/// version fences, construct, initialize. The image is deliberately
/// leaked; see the module docs.
fn construct_from_library(
    name: &str,
    path: &std::path::Path,
    config: &serde_json::Value,
) -> Result<Box<dyn Middleware>, StratoError> {
    let library = unsafe { Library::new(path) }.map_err(|e| {
        StratoError::Dependency(format!("failed to map artifact {}: {e}", path.display()))
    })?;

    let declaration: MiddlewareDeclaration = unsafe {
        library
            .get::<*const MiddlewareDeclaration>(DECLARATION_SYMBOL)
            .map_err(|e| {
                StratoError::Validation(ValidationError::SymbolMissing(format!(
                    "{}: {e}",
                    crate::middleware::DECLARATION_SYMBOL_NAME
                )))
            })?
            .read()
    };

    if declaration.abi_version != ABI_VERSION {
        return Err(StratoError::Validation(ValidationError::SignatureWrong(
            format!(
                "artifact declares ABI v{}, host speaks v{ABI_VERSION}",
                declaration.abi_version
            ),
        )));
    }
    if declaration.rustc_version != RUSTC_VERSION {
        return Err(StratoError::Validation(ValidationError::ToolchainMismatch {
            artifact: declaration.rustc_version.to_string(),
            host: RUSTC_VERSION.to_string(),
        }));
    }

    let middleware = (declaration.construct)(config)
        .map_err(|msg| StratoError::plugin_fault(name, format!("constructor: {msg}")))?;
    middleware.initialize(config)?;

    // Once a declaration has been trusted and an instance constructed, the
    // image must outlive every handler cloned out of it.
    std::mem::forget(library);

    Ok(middleware)
}

/// A terminal handler that immediately returns the given status. Used by
/// probes, dry-run tests, and the test suites.
pub fn noop_handler(status: u16) -> Handler {
    Arc::new(move |_ctx| {
        Box::pin(async move { Ok(crate::context::Response::new(status)) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Response;

    struct NullMiddleware;

    impl Middleware for NullMiddleware {
        fn name(&self) -> &str {
            "null"
        }

        fn wrap(&self, next: Handler) -> Handler {
            next
        }
    }

    fn null_constructor(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
        Ok(Box::new(NullMiddleware))
    }

    fn failing_constructor(_config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
        Err("configured to fail".to_string())
    }

    fn catalog() -> BuiltinCatalog {
        let catalog = BuiltinCatalog::new();
        catalog.register("null", null_constructor);
        catalog.register("broken", failing_constructor);
        catalog
    }

    fn loader() -> PluginLoader {
        PluginLoader::new(catalog(), Duration::from_secs(5))
    }

    fn record(name: &str, binary_ref: &str) -> PluginRecord {
        PluginRecord::new(name, "1.0", binary_ref)
    }

    #[tokio::test]
    async fn load_builtin_and_query_table() {
        let loader = loader();
        let mw = loader
            .load(&record("a", "builtin:null"), None)
            .await
            .unwrap();
        assert_eq!(mw.name(), "null");
        assert!(loader.is_loaded("a").await);
        assert_eq!(loader.len().await, 1);
        assert!(loader.get("a").await.is_some());
    }

    #[tokio::test]
    async fn second_load_of_same_name_conflicts() {
        let loader = loader();
        loader.load(&record("a", "builtin:null"), None).await.unwrap();
        let err = loader.load(&record("a", "builtin:null"), None).await;
        assert!(matches!(err, Err(StratoError::Conflict(_))));
    }

    #[tokio::test]
    async fn failed_construction_leaves_no_residue() {
        let loader = loader();
        let err = loader.load(&record("a", "builtin:broken"), None).await;
        assert!(matches!(err, Err(StratoError::PluginFault { .. })));
        assert!(!loader.is_loaded("a").await);
        assert_eq!(loader.len().await, 0);
    }

    #[tokio::test]
    async fn unknown_builtin_is_not_found() {
        let loader = loader();
        let err = loader.load(&record("a", "builtin:ghost"), None).await;
        assert!(matches!(err, Err(StratoError::NotFound(_))));
    }

    #[tokio::test]
    async fn library_load_of_garbage_file_fails_dependency() {
        let loader = loader();
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join(format!("junk.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&path, b"not a library").unwrap();
        let err = loader
            .load(&record("a", "blob:sha256-junk"), Some(path))
            .await;
        assert!(matches!(err, Err(StratoError::Dependency(_))));
        assert!(!loader.is_loaded("a").await);
    }

    #[tokio::test]
    async fn unload_is_idempotent() {
        let loader = loader();
        loader.load(&record("a", "builtin:null"), None).await.unwrap();
        assert!(loader.unload("a").await);
        assert!(!loader.unload("a").await);
        assert!(!loader.is_loaded("a").await);
    }

    #[tokio::test]
    async fn unload_all_drains_table() {
        let loader = loader();
        loader.load(&record("a", "builtin:null"), None).await.unwrap();
        loader.load(&record("b", "builtin:null"), None).await.unwrap();
        loader.unload_all().await;
        assert_eq!(loader.len().await, 0);
    }

    #[tokio::test]
    async fn noop_handler_returns_status() {
        let handler = noop_handler(204);
        let resp: Response = handler(crate::context::RequestContext::get("/")).await.unwrap();
        assert_eq!(resp.status, 204);
    }
}
