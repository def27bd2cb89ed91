//! Access-log middleware.
//!
//! Emits one structured log line per request after the inner handler
//! returns, including latency and outcome. Usually placed at a low
//! priority so it observes the whole chain.

use serde::Deserialize;
use std::sync::Arc;
use strato_plugin::middleware::Middleware;
use strato_plugin::Handler;

#[derive(Debug, Deserialize, Clone)]
struct AccessLoggerConfig {
    /// Also log request headers (verbose).
    #[serde(default)]
    log_headers: bool,

    /// Skip paths with this prefix (health checks, probes).
    #[serde(default)]
    exclude_prefix: Option<String>,
}

pub struct AccessLoggerMiddleware {
    config: AccessLoggerConfig,
}

pub fn construct(config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
    let cfg: AccessLoggerConfig =
        serde_json::from_value(config.clone()).map_err(|e| format!("invalid config: {e}"))?;
    Ok(Box::new(AccessLoggerMiddleware { config: cfg }))
}

impl Middleware for AccessLoggerMiddleware {
    fn name(&self) -> &str {
        "access-logger"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let config = self.config.clone();
        Arc::new(move |ctx| {
            let config = config.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                if let Some(prefix) = &config.exclude_prefix
                    && ctx.path.starts_with(prefix.as_str())
                {
                    return next(ctx).await;
                }

                let method = ctx.method.clone();
                let uri = ctx.uri.clone();
                let client_ip = ctx.client_ip.clone();
                let start = std::time::Instant::now();
                if config.log_headers {
                    tracing::debug!(method = %method, uri = %uri, headers = ?ctx.headers, "request headers");
                }

                let result = next(ctx).await;
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                match &result {
                    Ok(resp) => {
                        tracing::info!(
                            method = %method,
                            uri = %uri,
                            status = resp.status,
                            latency_ms = format!("{latency_ms:.2}"),
                            client_ip = %client_ip,
                            "access"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            method = %method,
                            uri = %uri,
                            error = %e,
                            latency_ms = format!("{latency_ms:.2}"),
                            client_ip = %client_ip,
                            "access error"
                        );
                    }
                }
                result
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strato_plugin::{noop_handler, RequestContext};

    #[tokio::test]
    async fn passes_response_through() {
        let mw = construct(&serde_json::json!({})).unwrap();
        let handler = mw.wrap(noop_handler(204));
        let resp = handler(RequestContext::get("/api")).await.unwrap();
        assert_eq!(resp.status, 204);
    }

    #[tokio::test]
    async fn excluded_prefix_still_delegates() {
        let mw = construct(&serde_json::json!({"exclude_prefix": "/health"})).unwrap();
        let handler = mw.wrap(noop_handler(200));
        let resp = handler(RequestContext::get("/health/live")).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let err = match construct(&serde_json::json!({"log_headers": "yes"})) {
            Err(e) => e,
            Ok(_) => panic!("expected construct to return an error"),
        };
        assert!(err.contains("invalid config"));
    }
}
