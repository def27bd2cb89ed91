use crate::context::Handler;
use strato_core::StratoError;

/// ABI version of the middleware constructor contract. Bumped whenever
/// [`MiddlewareDeclaration`] or the [`Middleware`] trait changes shape.
pub const ABI_VERSION: u32 = 1;

/// Semantic rustc version this copy of the crate was compiled with.
///
/// A plugin artifact links its own copy of this crate, so its declaration
/// carries the plugin's toolchain while the host compares against its own.
/// Trait objects are not ABI-stable across compilers; an exact match is
/// required before a declaration is trusted.
pub static RUSTC_VERSION: &str = env!("STRATO_RUSTC_VERSION");

/// Marker string embedded in every conforming artifact, scanned by the
/// validator without loading the image.
pub static ABI_MARKER: &str = concat!("strato-abi:", env!("STRATO_RUSTC_VERSION"));

/// Prefix of [`ABI_MARKER`], used when scanning artifact bytes.
pub const ABI_MARKER_PREFIX: &str = "strato-abi:";

/// Name of the exported declaration symbol.
pub const DECLARATION_SYMBOL_NAME: &str = "strato_middleware_declaration";

/// Null-terminated symbol name for `libloading`.
pub const DECLARATION_SYMBOL: &[u8] = b"strato_middleware_declaration\0";

/// The middleware contract every plugin implements.
///
/// `initialize` is called exactly once after construction, with the same
/// configuration the constructor received. `wrap` turns an inner handler
/// into the plugin's own handler; it must return promptly and defer real
/// work to the returned handler. `cleanup` must be idempotent.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn initialize(&self, config: &serde_json::Value) -> Result<(), StratoError> {
        let _ = config;
        Ok(())
    }

    fn wrap(&self, next: Handler) -> Handler;

    fn cleanup(&self) -> Result<(), StratoError> {
        Ok(())
    }
}

/// Constructor signature exported by plugin artifacts: takes the record's
/// configuration mapping, returns a middleware or an error message.
pub type MiddlewareConstructor =
    fn(&serde_json::Value) -> Result<Box<dyn Middleware>, String>;

/// The exported declaration static. The loader resolves this symbol,
/// verifies both versions, then invokes `construct` exactly once.
#[derive(Clone, Copy)]
pub struct MiddlewareDeclaration {
    pub abi_version: u32,
    pub rustc_version: &'static str,
    pub construct: MiddlewareConstructor,
}

/// Export a [`MiddlewareDeclaration`] from a plugin crate.
///
/// ```ignore
/// fn construct(config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
///     Ok(Box::new(MyMiddleware::from_config(config)?))
/// }
///
/// strato_plugin::declare_middleware!(construct);
/// ```
#[macro_export]
macro_rules! declare_middleware {
    ($construct:path) => {
        #[allow(non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static strato_middleware_declaration: $crate::middleware::MiddlewareDeclaration =
            $crate::middleware::MiddlewareDeclaration {
                abi_version: $crate::middleware::ABI_VERSION,
                rustc_version: $crate::middleware::RUSTC_VERSION,
                construct: $construct,
            };

        /// Keeps the ABI marker in the artifact for the validator's scan.
        #[used]
        static STRATO_ABI_MARKER_REF: &str = $crate::middleware::ABI_MARKER;
    };
}

/// `major.minor` prefix of a semantic rustc version.
pub fn major_minor(version: &str) -> &str {
    match version.match_indices('.').nth(1) {
        Some((idx, _)) => &version[..idx],
        None => version,
    }
}
