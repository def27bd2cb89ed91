//! The observer shim wrapped around every registered instance.
//!
//! Record-keeping is automatic: the shim wraps the inner middleware's
//! handler and updates the metrics registry after the handler returns, so
//! no lock is held while plugin code runs.

use crate::context::{Handler, RequestContext, Response};
use crate::loader::noop_handler;
use crate::middleware::Middleware;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use strato_core::{Phase, StratoError};
use strato_observability::{MetricsCollector, MetricsRegistry};

pub struct ObservedMiddleware {
    name: String,
    phase: Phase,
    inner: Arc<dyn Middleware>,
    registry: Arc<MetricsRegistry>,
    collector: Option<Arc<MetricsCollector>>,
}

impl ObservedMiddleware {
    pub fn new(
        name: impl Into<String>,
        phase: Phase,
        inner: Arc<dyn Middleware>,
        registry: Arc<MetricsRegistry>,
        collector: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            inner,
            registry,
            collector,
        }
    }
}

impl Middleware for ObservedMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn initialize(&self, config: &serde_json::Value) -> Result<(), StratoError> {
        self.inner.initialize(config)
    }

    fn wrap(&self, next: Handler) -> Handler {
        let wrapped = self.inner.wrap(next);
        let name = self.name.clone();
        let phase = self.phase;
        let registry = Arc::clone(&self.registry);
        let collector = self.collector.clone();

        Arc::new(move |ctx: RequestContext| {
            let wrapped = Arc::clone(&wrapped);
            let name = name.clone();
            let registry = Arc::clone(&registry);
            let collector = collector.clone();
            Box::pin(async move {
                let start = Instant::now();
                let result = wrapped(ctx).await;
                let elapsed = start.elapsed();
                match &result {
                    Ok(_) => registry.record_success(&name, elapsed),
                    Err(e) => registry.record_failure(&name, elapsed, &e.to_string()),
                }
                if let Some(collector) = &collector {
                    collector.record_invocation(
                        &name,
                        phase.as_str(),
                        result.is_ok(),
                        elapsed.as_secs_f64(),
                    );
                }
                result
            })
        })
    }

    fn cleanup(&self) -> Result<(), StratoError> {
        self.inner.cleanup()
    }
}

/// Synthetic request fed to a single instance for probes and dry-runs.
#[derive(Debug, Clone, Deserialize)]
pub struct TestRequest {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

impl Default for TestRequest {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: default_path(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

impl TestRequest {
    pub fn into_context(self) -> RequestContext {
        let mut ctx = RequestContext::new(self.method, self.path, self.headers, "127.0.0.1");
        ctx.body = self.body.map(String::into_bytes);
        ctx
    }
}

/// Outcome of a single-instance dry-run.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub plugin: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: f64,
}

/// Run `fixture` through one middleware in isolation, around a 200
/// terminal. The chain itself is untouched.
pub async fn run_test(
    name: &str,
    middleware: &Arc<dyn Middleware>,
    fixture: TestRequest,
) -> TestResult {
    let handler = middleware.wrap(noop_handler(200));
    let start = Instant::now();
    let result = handler(fixture.into_context()).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    match result {
        Ok(Response { status, .. }) => TestResult {
            plugin: name.to_string(),
            status: Some(status),
            error: None,
            duration_ms,
        },
        Err(e) => TestResult {
            plugin: name.to_string(),
            status: None,
            error: Some(e.to_string()),
            duration_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fixture middleware that can be told to fail.
    struct Flaky {
        fail: std::sync::atomic::AtomicBool,
    }

    impl Middleware for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn wrap(&self, next: Handler) -> Handler {
            let fail = self.fail.load(std::sync::atomic::Ordering::Relaxed);
            Arc::new(move |ctx| {
                let next = Arc::clone(&next);
                Box::pin(async move {
                    if fail {
                        Err(StratoError::plugin_fault("flaky", "induced failure"))
                    } else {
                        next(ctx).await
                    }
                })
            })
        }
    }

    fn observed(
        inner: Arc<dyn Middleware>,
        registry: Arc<MetricsRegistry>,
    ) -> ObservedMiddleware {
        ObservedMiddleware::new("flaky", Phase::Unassigned, inner, registry, None)
    }

    #[tokio::test]
    async fn success_is_recorded() {
        let registry = Arc::new(MetricsRegistry::new());
        let inner = Arc::new(Flaky {
            fail: false.into(),
        });
        let shim = observed(inner, Arc::clone(&registry));

        let handler = shim.wrap(noop_handler(200));
        let resp = handler(RequestContext::get("/")).await.unwrap();
        assert_eq!(resp.status, 200);

        let m = registry.get("flaky").unwrap();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.failed_requests, 0);
        assert!(m.min_latency.unwrap() <= m.max_latency.unwrap());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_propagates() {
        let registry = Arc::new(MetricsRegistry::new());
        let inner = Arc::new(Flaky { fail: true.into() });
        let shim = observed(inner, Arc::clone(&registry));

        let handler = shim.wrap(noop_handler(200));
        let err = handler(RequestContext::get("/")).await.unwrap_err();
        assert!(matches!(err, StratoError::PluginFault { .. }));

        let m = registry.get("flaky").unwrap();
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.consecutive_errors, 1);
        assert_eq!(m.last_error.as_deref(), Some("Plugin fault in flaky: induced failure"));
    }

    #[tokio::test]
    async fn run_test_reports_status_and_duration() {
        let inner: Arc<dyn Middleware> = Arc::new(Flaky {
            fail: false.into(),
        });
        let result = run_test("flaky", &inner, TestRequest::default()).await;
        assert_eq!(result.status, Some(200));
        assert!(result.error.is_none());
        assert!(result.duration_ms >= 0.0);
        assert!(result.duration_ms < Duration::from_secs(1).as_millis() as f64);
    }

    #[tokio::test]
    async fn run_test_reports_plugin_error() {
        let inner: Arc<dyn Middleware> = Arc::new(Flaky { fail: true.into() });
        let result = run_test("flaky", &inner, TestRequest::default()).await;
        assert!(result.status.is_none());
        assert!(result.error.unwrap().contains("induced failure"));
    }
}
