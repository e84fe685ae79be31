//! Request builders and assertion helpers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{Method, Uri};
use serde_json::Value;
use std::sync::Arc;
use svchost_core::{RequestContext, RequestContextBuilder};

/// Context builder for `method` on `path`, with a `Host` header set.
///
/// An unparsable path falls back to `/`.
#[must_use]
pub fn request(method: Method, path: &str) -> RequestContextBuilder {
    let uri: Uri = path.parse().unwrap_or_default();
    RequestContext::builder(method, uri).header("host", "svchost.test")
}

/// Finished `GET` context.
#[must_use]
pub fn get(path: &str) -> Arc<RequestContext> {
    request(Method::GET, path).build()
}

/// Finished `POST` context with a JSON body.
#[must_use]
pub fn post_json(path: &str, body: &Value) -> Arc<RequestContext> {
    request(Method::POST, path)
        .header("content-type", "application/json")
        .body(body.to_string())
        .build()
}

/// `Authorization` header value for HTTP basic auth.
///
/// # Example
///
/// ```
/// use svchost_testing::helpers::basic_auth;
///
/// assert_eq!(basic_auth("alice", "secret"), "Basic YWxpY2U6c2VjcmV0");
/// ```
#[must_use]
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// `Authorization` header value for a bearer token.
#[must_use]
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Install a test-friendly tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
