//! Security-headers middleware.
//!
//! Injects standardised response headers that protect clients from common
//! web-layer attacks. All fields have secure defaults so the middleware is
//! effective with an empty `config: {}` block.

use serde::Deserialize;
use std::sync::Arc;
use strato_plugin::middleware::Middleware;
use strato_plugin::Handler;

#[derive(Debug, Deserialize, Clone)]
struct SecurityHeadersConfig {
    /// `Strict-Transport-Security: max-age=<N>` value (seconds).
    #[serde(default = "default_hsts_max_age")]
    hsts_max_age: u64,

    /// Append `; includeSubDomains` to the HSTS directive.
    #[serde(default = "default_true")]
    hsts_include_subdomains: bool,

    /// `X-Frame-Options` value: `DENY`, `SAMEORIGIN`, or empty to omit.
    #[serde(default = "default_frame_options")]
    x_frame_options: String,

    /// Emit `X-Content-Type-Options: nosniff`.
    #[serde(default = "default_true")]
    x_content_type_options: bool,

    /// `Referrer-Policy` value.
    #[serde(default = "default_referrer_policy")]
    referrer_policy: String,

    /// `Content-Security-Policy` value. Empty string = omit the header.
    #[serde(default)]
    content_security_policy: String,
}

fn default_hsts_max_age() -> u64 {
    31_536_000
}

fn default_frame_options() -> String {
    "DENY".to_string()
}

fn default_referrer_policy() -> String {
    "no-referrer".to_string()
}

fn default_true() -> bool {
    true
}

pub struct SecurityHeadersMiddleware {
    config: SecurityHeadersConfig,
}

pub fn construct(config: &serde_json::Value) -> Result<Box<dyn Middleware>, String> {
    let cfg: SecurityHeadersConfig =
        serde_json::from_value(config.clone()).map_err(|e| format!("invalid config: {e}"))?;
    Ok(Box::new(SecurityHeadersMiddleware { config: cfg }))
}

impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &str {
        "security-headers"
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
                let mut resp = next(ctx).await?;

                let mut hsts = format!("max-age={}", config.hsts_max_age);
                if config.hsts_include_subdomains {
                    hsts.push_str("; includeSubDomains");
                }
                resp.set_header("strict-transport-security".into(), hsts);

                if !config.x_frame_options.is_empty() {
                    resp.set_header("x-frame-options".into(), config.x_frame_options.clone());
                }
                if config.x_content_type_options {
                    resp.set_header("x-content-type-options".into(), "nosniff".into());
                }
                if !config.referrer_policy.is_empty() {
                    resp.set_header("referrer-policy".into(), config.referrer_policy.clone());
                }
                if !config.content_security_policy.is_empty() {
                    resp.set_header(
                        "content-security-policy".into(),
                        config.content_security_policy.clone(),
                    );
                }
                Ok(resp)
            })
        })
    }
}
