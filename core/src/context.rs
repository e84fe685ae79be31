//! Per-request context shared by every handler in a dispatcher chain.

use crate::error::{HostError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use uuid::Uuid;

/// Default request body cap in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 1_000_000;

/// Deferred body source supplied by the transport.
///
/// The transport enforces the byte cap while accumulating and resolves to
/// [`HostError::Http`] 413 when it is exceeded.
pub type BodyFuture = Pin<Box<dyn Future<Output = Result<Bytes>> + Send>>;

/// Everything a handler may need to know about one inbound request.
///
/// Created once by the transport and shared (`Arc`) by the whole chain.
/// Identity fields and pending response headers use interior mutability so
/// handlers can annotate the request as it flows through.
pub struct RequestContext {
    id: Uuid,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    common_name: Option<String>,
    base_url: Option<String>,
    started: Instant,
    received_at: DateTime<Utc>,
    user: RwLock<Option<String>>,
    unverified_user: RwLock<Option<String>>,
    response_headers: Mutex<HeaderMap>,
    body: LazyBody,
}

impl RequestContext {
    /// Start building a context.
    #[must_use]
    pub fn builder(method: Method, uri: Uri) -> RequestContextBuilder {
        RequestContextBuilder {
            method,
            uri,
            headers: HeaderMap::new(),
            remote_addr: None,
            common_name: None,
            base_url: None,
            body: LazyBody::empty(),
        }
    }

    /// Unique id of this request.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Path and query, as received.
    #[must_use]
    pub fn url(&self) -> &str {
        self.uri
            .path_and_query()
            .map_or_else(|| self.uri.path(), http::uri::PathAndQuery::as_str)
    }

    /// Path component.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text. Non-UTF-8 values are treated as absent.
    #[must_use]
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Peer address, when the transport knows it.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// TLS client certificate common name, when the transport supplies one.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Monotonic start time.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started
    }

    /// Wall-clock receive time.
    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Time since the request was received.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Authenticated user, if any.
    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the authenticated user.
    pub fn set_user(&self, user: impl Into<String>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(user.into());
    }

    /// Claimed but not yet verified user, if any.
    #[must_use]
    pub fn unverified_user(&self) -> Option<String> {
        self.unverified_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record a claimed user before verification.
    pub fn set_unverified_user(&self, user: impl Into<String>) {
        *self
            .unverified_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(user.into());
    }

    /// Identity for logs.
    ///
    /// `+<common name>` for certificate clients, the user when authenticated,
    /// `~<claimed user>` when only a claim exists, otherwise empty.
    #[must_use]
    pub fn identity(&self) -> String {
        if let Some(cn) = &self.common_name {
            return format!("+{cn}");
        }
        if let Some(user) = self.user() {
            return user;
        }
        self.unverified_user()
            .map(|claimed| format!("~{claimed}"))
            .unwrap_or_default()
    }

    /// Absolute reference to the requested resource, optionally joined with
    /// a member name.
    ///
    /// The origin comes from the configured base URL, or else from
    /// `X-Forwarded-Proto` and `Host`.
    #[must_use]
    pub fn reference(&self, member: Option<&str>) -> String {
        let origin = self.base_url.clone().unwrap_or_else(|| {
            let scheme = self.header("x-forwarded-proto").unwrap_or("http");
            let host = self
                .header(http::header::HOST)
                .or_else(|| self.uri.authority().map(http::uri::Authority::as_str))
                .unwrap_or("localhost");
            format!("{scheme}://{host}")
        });
        let origin = origin.trim_end_matches('/');
        let path = self.uri.path().trim_end_matches('/');

        match member {
            Some(member) => format!("{origin}{path}/{}", urlencoding::encode(member)),
            None if path.is_empty() => format!("{origin}/"),
            None => format!("{origin}{path}"),
        }
    }

    /// Read the whole body, once; later calls return the cached bytes.
    ///
    /// # Errors
    ///
    /// Propagates the transport's read failure (413 when over the cap).
    pub async fn body(&self) -> Result<Bytes> {
        self.body.read().await
    }

    /// Parse the body as JSON. An empty body yields `None`.
    ///
    /// # Errors
    ///
    /// [`HostError::Http`] 400 on malformed JSON, or the body read failure.
    pub async fn json_body(&self) -> Result<Option<Value>> {
        let bytes = self.body().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HostError::http_with_message(400, format!("Invalid JSON body: {e}")))
    }

    /// Set a response header, replacing any previous value.
    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    /// Pending response header value, if set.
    #[must_use]
    pub fn response_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove a pending response header.
    pub fn remove_response_header(&self, name: &HeaderName) {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Copy of all pending response headers.
    #[must_use]
    pub fn response_headers(&self) -> HeaderMap {
        self.response_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("remote_addr", &self.remote_addr)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestContext`].
pub struct RequestContextBuilder {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    common_name: Option<String>,
    base_url: Option<String>,
    body: LazyBody,
}

impl RequestContextBuilder {
    /// Replace all request headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Add one request header. Invalid names or values are ignored.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Peer address.
    #[must_use]
    pub const fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// TLS client certificate common name.
    #[must_use]
    pub fn common_name(mut self, cn: impl Into<String>) -> Self {
        self.common_name = Some(cn.into());
        self
    }

    /// Fixed origin for [`RequestContext::reference`].
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Body already in memory.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = LazyBody::ready(body.into());
        self
    }

    /// Body read on first use.
    #[must_use]
    pub fn body_future(mut self, body: BodyFuture) -> Self {
        self.body = LazyBody::deferred(body);
        self
    }

    /// Finish.
    #[must_use]
    pub fn build(self) -> Arc<RequestContext> {
        Arc::new(RequestContext {
            id: Uuid::new_v4(),
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            remote_addr: self.remote_addr,
            common_name: self.common_name,
            base_url: self.base_url,
            started: Instant::now(),
            received_at: Utc::now(),
            user: RwLock::new(None),
            unverified_user: RwLock::new(None),
            response_headers: Mutex::new(HeaderMap::new()),
            body: self.body,
        })
    }
}

struct LazyBody {
    source: Mutex<Option<BodyFuture>>,
    cached: OnceCell<Bytes>,
}

impl LazyBody {
    fn empty() -> Self {
        Self::ready(Bytes::new())
    }

    fn ready(bytes: Bytes) -> Self {
        Self {
            source: Mutex::new(None),
            cached: OnceCell::from(bytes),
        }
    }

    fn deferred(source: BodyFuture) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            cached: OnceCell::new(),
        }
    }

    async fn read(&self) -> Result<Bytes> {
        self.cached
            .get_or_try_init(|| async {
                let source = self
                    .source
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match source {
                    Some(body) => body.await,
                    None => Err(HostError::http_with_message(
                        400,
                        "Request body is no longer available",
                    )),
                }
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn get(path: &str) -> RequestContextBuilder {
        RequestContext::builder(Method::GET, path.parse().unwrap())
    }

    #[test]
    fn test_identity_precedence() {
        let ctx = get("/").build();
        assert_eq!(ctx.identity(), "");

        ctx.set_unverified_user("alice");
        assert_eq!(ctx.identity(), "~alice");

        ctx.set_user("alice");
        assert_eq!(ctx.identity(), "alice");

        let cert = get("/").common_name("node-1").build();
        cert.set_user("bob");
        assert_eq!(cert.identity(), "+node-1");
    }

    #[test]
    fn test_reference_uses_host_header() {
        let ctx = get("/counter/").header("host", "svc.local:8080").build();
        assert_eq!(ctx.reference(None), "http://svc.local:8080/counter");
        assert_eq!(
            ctx.reference(Some("increment")),
            "http://svc.local:8080/counter/increment"
        );

        let root = get("/").base_url("https://api.example/").build();
        assert_eq!(root.reference(None), "https://api.example/");
        assert_eq!(root.reference(Some("a b")), "https://api.example/a%20b");
    }

    #[tokio::test]
    async fn test_json_body() {
        let ctx = get("/").body(r#"{"$args": [1]}"#).build();
        assert_eq!(ctx.json_body().await.unwrap(), Some(json!({"$args": [1]})));

        let empty = get("/").build();
        assert_eq!(empty.json_body().await.unwrap(), None);

        let broken = get("/").body("{nope").build();
        assert_eq!(broken.json_body().await.unwrap_err().status_code(), 400);
    }

    #[tokio::test]
    async fn test_deferred_body_is_read_once() {
        let ctx = get("/")
            .body_future(Box::pin(async { Ok(Bytes::from_static(b"[1,2]")) }))
            .build();
        assert_eq!(ctx.body().await.unwrap(), Bytes::from_static(b"[1,2]"));
        assert_eq!(ctx.body().await.unwrap(), Bytes::from_static(b"[1,2]"));
    }

    #[tokio::test]
    async fn test_deferred_body_error_propagates() {
        let ctx = get("/")
            .body_future(Box::pin(async { Err(HostError::http(413)) }))
            .build();
        assert_eq!(ctx.body().await.unwrap_err().status_code(), 413);
    }

    #[test]
    fn test_response_headers() {
        let ctx = get("/").build();
        ctx.set_response_header(http::header::ETAG, HeaderValue::from_static("abc"));
        assert_eq!(
            ctx.response_header(&http::header::ETAG),
            Some(HeaderValue::from_static("abc"))
        );
        ctx.remove_response_header(&http::header::ETAG);
        assert!(ctx.response_headers().is_empty());
    }
}
