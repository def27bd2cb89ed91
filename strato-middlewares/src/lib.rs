pub mod access_logger;
pub mod request_id;
pub mod security_headers;

use strato_plugin::BuiltinCatalog;

/// Register all built-in middlewares into the loader's catalog. Records
/// reference them as `builtin:<name>`.
pub fn register_all(catalog: &BuiltinCatalog) {
    catalog.register("request-id", request_id::construct);
    catalog.register("security-headers", security_headers::construct);
    catalog.register("access-logger", access_logger::construct);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtins_are_registered() {
        let catalog = BuiltinCatalog::new();
        register_all(&catalog);
        assert!(catalog.contains("request-id"));
        assert!(catalog.contains("security-headers"));
        assert!(catalog.contains("access-logger"));
    }
}
