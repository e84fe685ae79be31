//! First handler of every chain: CORS, caching, long polling, error
//! conversion, access log and request metrics.

use crate::error::ErrorEnvelope;
use http::StatusCode;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, ETAG, HeaderValue, IF_NONE_MATCH,
};
use std::sync::Arc;
use std::time::Duration;
use svchost_core::{HandlerFuture, HostError, Next, Reply, RequestContext, RequestHandler, Result};
use svchost_runtime::metrics::HttpMetrics;

/// Default pause between long-poll re-checks.
pub const DEFAULT_LONG_POLL_INTERVAL: Duration = Duration::from_millis(500);

const ALLOW_METHODS: &str = "GET, POST, OPTIONS, PUT, PATCH, DELETE";
const ALLOW_HEADERS: &str = "X-Requested-With,content-type,prefer,if-none-match";
const CACHE_CONTROL_VALUE: &str = "private, max-age=31557600";

/// Core handler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    production: bool,
    long_poll_interval: Duration,
}

impl CoreConfig {
    /// Development mode with the default long-poll interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            production: false,
            long_poll_interval: DEFAULT_LONG_POLL_INTERVAL,
        }
    }

    /// Read `SVCHOST_PRODUCTION` and `SVCHOST_LONG_POLL_INTERVAL_MS`.
    ///
    /// Unset or unparsable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(value) = std::env::var("SVCHOST_PRODUCTION") {
            config.production = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Some(ms) = std::env::var("SVCHOST_LONG_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.long_poll_interval = Duration::from_millis(ms);
        }
        config
    }

    /// Withhold exception detail from error envelopes.
    #[must_use]
    pub const fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Pause between long-poll re-checks.
    #[must_use]
    pub const fn with_long_poll_interval(mut self, interval: Duration) -> Self {
        self.long_poll_interval = interval;
        self
    }

    /// Whether production mode is on.
    #[must_use]
    pub const fn production(&self) -> bool {
        self.production
    }

    /// Pause between long-poll re-checks.
    #[must_use]
    pub const fn long_poll_interval(&self) -> Duration {
        self.long_poll_interval
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Always-first handler of a host's chain.
#[derive(Debug, Clone, Default)]
pub struct CoreHandler {
    config: CoreConfig,
}

impl CoreHandler {
    /// Handler with `config`.
    #[must_use]
    pub const fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    async fn cached(&self, ctx: &RequestContext, next: Next<'_>, reply: Reply) -> Result<Reply> {
        let Some(hash) = content_hash(&reply) else {
            return Ok(reply);
        };
        if !if_none_match(ctx, &hash) {
            return Ok(with_cache_headers(ctx, reply));
        }

        if let Some(wait) = prefer_wait(ctx) {
            loop {
                let elapsed = ctx.elapsed();
                if elapsed >= wait {
                    break;
                }
                tokio::time::sleep(self.config.long_poll_interval.min(wait - elapsed)).await;
                HttpMetrics::record_long_poll_recheck();

                let fresh = next.run().await?;
                if content_hash(&fresh).as_deref() != Some(hash.as_str()) {
                    tracing::debug!(request_id = %ctx.id(), waited_ms = ctx.elapsed().as_millis(), "Long poll saw a change");
                    return Ok(with_cache_headers(ctx, fresh));
                }
            }
        }

        set_etag(ctx, &hash);
        Ok(Reply::Empty(StatusCode::NOT_MODIFIED))
    }

    fn error_reply(&self, ctx: &RequestContext, err: &HostError) -> Reply {
        let status = err.status_code();
        if err.is_http() && status < 500 {
            tracing::debug!(request_id = %ctx.id(), status, error = %err, "Request rejected");
        } else {
            tracing::error!(request_id = %ctx.id(), status, error = %err, kind = err.kind(), "Request failed");
        }
        if status == 413 {
            ctx.set_response_header(CONNECTION, HeaderValue::from_static("close"));
        }
        ErrorEnvelope::from_error(err, ctx.reference(None), self.config.production).to_reply()
    }
}

impl RequestHandler for CoreHandler {
    fn name(&self) -> &str {
        "core"
    }

    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async move {
            set_cors_headers(ctx);

            let outcome = match next.run().await {
                Ok(reply) => self.cached(ctx, next, reply).await,
                Err(err) => Err(err),
            };
            let reply = outcome.unwrap_or_else(|err| self.error_reply(ctx, &err));

            log_access(ctx, reply.status());
            Ok(reply)
        })
    }
}

fn set_cors_headers(ctx: &RequestContext) {
    ctx.set_response_header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    ctx.set_response_header(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    ctx.set_response_header(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    ctx.set_response_header(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

/// `$hash` of a successful, non-error reply body.
fn content_hash(reply: &Reply) -> Option<String> {
    if !reply.status().is_success() {
        return None;
    }
    let body = reply.json()?.as_object()?;
    if body.get("$type").and_then(|t| t.as_str()) == Some("error") {
        return None;
    }
    body.get("$hash")?.as_str().map(str::to_string)
}

/// Whether any entity tag in `If-None-Match` names `hash`.
fn if_none_match(ctx: &RequestContext, hash: &str) -> bool {
    ctx.header(IF_NONE_MATCH).is_some_and(|value| {
        value.split(',').any(|tag| {
            let tag = tag.trim();
            let tag = tag.strip_prefix("W/").unwrap_or(tag);
            tag.trim_matches('"') == hash
        })
    })
}

/// `wait=<seconds>` preference, if present and valid.
fn prefer_wait(ctx: &RequestContext) -> Option<Duration> {
    ctx.header("prefer")?
        .split([';', ','])
        .filter_map(|pref| pref.trim().strip_prefix("wait="))
        .find_map(|secs| secs.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn set_etag(ctx: &RequestContext, hash: &str) {
    if let Ok(value) = HeaderValue::from_str(hash) {
        ctx.set_response_header(ETAG, value);
    }
}

fn with_cache_headers(ctx: &RequestContext, reply: Reply) -> Reply {
    if let Some(hash) = content_hash(&reply) {
        set_etag(ctx, &hash);
        ctx.set_response_header(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));
    }
    reply
}

fn log_access(ctx: &RequestContext, status: StatusCode) {
    let elapsed = ctx.elapsed();
    let identity = ctx.identity();
    let remote = ctx
        .remote_addr()
        .map_or_else(|| "-".to_string(), |addr| addr.ip().to_string());

    tracing::info!(
        target: "svchost_web::access",
        request_id = %ctx.id(),
        identity = %identity,
        remote = %remote,
        method = %ctx.method(),
        status = status.as_u16(),
        url = %ctx.url(),
        duration_ms = elapsed.as_millis(),
        "{identity}@{remote} {} {} {} [{} ms]",
        ctx.method(),
        status.as_u16(),
        ctx.url(),
        elapsed.as_millis()
    );
    HttpMetrics::record_request(ctx.method().as_str(), status.as_u16(), elapsed);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use http::Method;
    use serde_json::json;

    fn ctx_with(headers: &[(&str, &str)]) -> Arc<RequestContext> {
        headers
            .iter()
            .fold(
                RequestContext::builder(Method::GET, "/".parse().unwrap()),
                |builder, (name, value)| builder.header(name, value),
            )
            .build()
    }

    #[test]
    fn test_content_hash_requires_success_and_non_error() {
        assert_eq!(
            content_hash(&Reply::Body(json!({"$hash": "h"}))),
            Some("h".to_string())
        );
        assert_eq!(
            content_hash(&Reply::Body(json!({"$type": "error", "$hash": "h"}))),
            None
        );
        assert_eq!(
            content_hash(&Reply::Json(StatusCode::NOT_FOUND, json!({"$hash": "h"}))),
            None
        );
        assert_eq!(content_hash(&Reply::Body(json!({"payload": 1}))), None);
    }

    #[test]
    fn test_if_none_match_normalizes_tags() {
        assert!(if_none_match(&ctx_with(&[("if-none-match", "abc")]), "abc"));
        assert!(if_none_match(&ctx_with(&[("if-none-match", "\"abc\"")]), "abc"));
        assert!(if_none_match(&ctx_with(&[("if-none-match", "x, W/\"abc\"")]), "abc"));
        assert!(!if_none_match(&ctx_with(&[("if-none-match", "abd")]), "abc"));
        assert!(!if_none_match(&ctx_with(&[]), "abc"));
    }

    #[test]
    fn test_prefer_wait_parsing() {
        assert_eq!(
            prefer_wait(&ctx_with(&[("prefer", "wait=5")])),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            prefer_wait(&ctx_with(&[("prefer", "respond-async; wait=2")])),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            prefer_wait(&ctx_with(&[("prefer", "handling=lenient, wait=1.5")])),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(prefer_wait(&ctx_with(&[("prefer", "wait=-1")])), None);
        assert_eq!(prefer_wait(&ctx_with(&[("prefer", "return=minimal")])), None);
    }

    #[test]
    fn test_config_builders() {
        let config = CoreConfig::new()
            .with_production(true)
            .with_long_poll_interval(Duration::from_millis(50));
        assert!(config.production());
        assert_eq!(config.long_poll_interval(), Duration::from_millis(50));
        assert_eq!(CoreConfig::default().long_poll_interval(), DEFAULT_LONG_POLL_INTERVAL);
    }
}
