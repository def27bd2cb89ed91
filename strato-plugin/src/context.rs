use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use strato_core::StratoError;

/// The future a handler returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, StratoError>> + Send>>;

/// A request handler. Middlewares compose by wrapping one handler in
/// another; the innermost handler is the host's terminal handler.
pub type Handler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// Mutable request context handed down the middleware chain.
///
/// This is the host-side view of the request the external HTTP framework
/// delivered; middlewares may rewrite it before delegating inward.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,

    /// Client IP address
    pub client_ip: String,

    /// Shared context between middlewares (key-value store)
    pub vars: HashMap<String, serde_json::Value>,

    pub request_start: std::time::Instant,
}

impl RequestContext {
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        headers: HashMap<String, String>,
        client_ip: impl Into<String>,
    ) -> Self {
        let uri = uri.into();
        // Parse path and query from URI
        let (path, query) = match uri.find('?') {
            Some(pos) => (uri[..pos].to_string(), uri[pos + 1..].to_string()),
            None => (uri.clone(), String::new()),
        };

        Self {
            method: method.into(),
            uri,
            path,
            query,
            headers,
            body: None,
            client_ip: client_ip.into(),
            vars: HashMap::new(),
            request_start: std::time::Instant::now(),
        }
    }

    /// Shorthand for tests and probes.
    pub fn get(path: &str) -> Self {
        Self::new("GET", path, HashMap::new(), "127.0.0.1")
    }

    /// Get a request header (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        let lower = name.to_lowercase();
        self.headers.retain(|k, _| k.to_lowercase() != lower);
    }

    /// Set a context variable (shared between middlewares).
    pub fn set_var(&mut self, key: String, value: serde_json::Value) {
        self.vars.insert(key, value);
    }

    pub fn get_var(&self, key: &str) -> Option<&serde_json::Value> {
        self.vars.get(key)
    }

    /// Elapsed time since request start.
    pub fn elapsed_ms(&self) -> f64 {
        self.request_start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Response produced by the composed chain.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Some(body.into()),
        }
    }

    pub fn set_header(&mut self, name: String, value: String) {
        self.headers.insert(name, value);
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }
}
