//! Request-ID middleware.
//!
//! Assigns a UUID to each request that does not already carry one and
//! reflects it on the response, so a request can be correlated across
//! gateway and upstream logs.

use serde::Deserialize;
use std::sync::Arc;
use strato_plugin::middleware::Middleware;
use strato_plugin::Handler;

#[derive(Debug, Deserialize, Clone)]
struct RequestIdConfig {
    /// Header carrying the request ID.
    #[serde(default = "default_header")]
    header: String,

    /// Overwrite an incoming ID instead of trusting it.
    #[serde(default)]
    force: bool,
}

fn default_header() -> String {
    "x-request-id".to_string()
}

pub struct RequestIdMiddleware {
    header: String,
    force: bool,
}

pub fn construct(config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
    let cfg: RequestIdConfig =
        serde_json::from_value(config.clone()).map_err(|e| format!("invalid config: {e}"))?;
    Ok(Box::new(RequestIdMiddleware {
        header: cfg.header,
        force: cfg.force,
    }))
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request-id"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn wrap(&self, next: Handler) -> Handler {
        let header = self.header.clone();
        let force = self.force;
        Arc::new(move |mut ctx| {
            let header = header.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let id = match ctx.get_header(&header) {
                    Some(existing) if !force => existing.to_string(),
                    _ => uuid::Uuid::new_v4().to_string(),
                };
                ctx.set_header(header.clone(), id.clone());
                ctx.set_var("request_id".into(), serde_json::json!(id));

                let mut resp = next(ctx).await?;
                resp.set_header(header, id);
                Ok(resp)
            })
        })
    }
}
