//! Ordered request handler chain.
//!
//! Handlers are folded into one immutable chain snapshot. Registering or
//! unregistering swaps in a new snapshot; requests already in flight keep
//! the one they started with.

use crate::error::ErrorEnvelope;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, HeaderValue};
use http::{Method, Response, StatusCode};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use svchost_core::{HostError, Next, Reply, RequestContext};

pub use svchost_core::{HandlerFuture, RequestHandler};

/// Body written when even the error envelope cannot be rendered.
const FALLBACK_BODY: &str =
    "{\"$type\":\"error\",\"$statusCode\":500,\"code\":500,\"message\":\"Internal Service Error\"}\n";

/// Runs every request through the registered handlers.
pub struct RequestDispatcher {
    chain: RwLock<Arc<[Arc<dyn RequestHandler>]>>,
    production: bool,
}

impl RequestDispatcher {
    /// Empty dispatcher. Every request is a 404 until a handler is registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chain: RwLock::new(Arc::from(Vec::new())),
            production: false,
        }
    }

    /// Withhold exception detail from errors that escape the chain.
    #[must_use]
    pub const fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Append a handler to the end of the chain.
    pub fn register(&self, handler: Arc<dyn RequestHandler>) {
        let mut chain = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        let mut handlers = chain.to_vec();
        tracing::debug!(handler = handler.name(), position = handlers.len(), "Registering request handler");
        handlers.push(handler);
        *chain = Arc::from(handlers);
    }

    /// Remove a previously registered handler. Returns `false` if it was not
    /// in the chain.
    pub fn unregister(&self, handler: &Arc<dyn RequestHandler>) -> bool {
        let target = Arc::as_ptr(handler).cast::<()>();
        let mut chain = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        let before = chain.len();
        let handlers: Vec<_> = chain
            .iter()
            .filter(|h| Arc::as_ptr(h).cast::<()>() != target)
            .cloned()
            .collect();
        let removed = handlers.len() != before;
        if removed {
            tracing::debug!(handler = handler.name(), "Unregistered request handler");
            *chain = Arc::from(handlers);
        }
        removed
    }

    /// Handler names in chain order.
    #[must_use]
    pub fn handlers(&self) -> Vec<String> {
        self.snapshot().iter().map(|h| h.name().to_string()).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<[Arc<dyn RequestHandler>]> {
        Arc::clone(&self.chain.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run `ctx` through the chain and render the outcome.
    ///
    /// Never fails: errors escaping the chain become error envelopes.
    pub async fn dispatch(&self, ctx: Arc<RequestContext>) -> Response<Bytes> {
        let chain = self.snapshot();
        let reply = match Next::new(&chain, &ctx).run().await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(request_id = %ctx.id(), error = %err, "Request failed outside the core handler");
                if err.status_code() == 413 {
                    ctx.set_response_header(CONNECTION, HeaderValue::from_static("close"));
                }
                ErrorEnvelope::from_error(&err, ctx.reference(None), self.production).to_reply()
            }
        };
        render(&ctx, reply)
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("handlers", &self.handlers())
            .field("production", &self.production)
            .finish()
    }
}

/// Pretty JSON followed by a newline.
///
/// # Errors
///
/// Returns [`HostError::Validation`] if the value cannot be serialized.
pub fn render_json(value: &Value) -> Result<Bytes, HostError> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    Ok(Bytes::from(body))
}

fn render(ctx: &RequestContext, reply: Reply) -> Response<Bytes> {
    let (status, body, extra) = match reply {
        Reply::Body(value) => (StatusCode::OK, Some(value), None),
        Reply::Json(status, value) => (status, Some(value), None),
        Reply::Empty(status) => (status, None, None),
        Reply::Response(response) => {
            let (parts, body) = response.into_parts();
            (parts.status, None, Some((parts.headers, body)))
        }
    };

    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response.headers_mut().extend(ctx.response_headers());

    if let Some(value) = body {
        let rendered = render_json(&value).unwrap_or_else(|err| {
            tracing::error!(request_id = %ctx.id(), error = %err, "Failed to render response body");
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            Bytes::from_static(FALLBACK_BODY.as_bytes())
        });
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *response.body_mut() = rendered;
    }
    if let Some((headers, body)) = extra {
        response.headers_mut().extend(headers);
        *response.body_mut() = body;
    }
    if ctx.method() == Method::HEAD {
        *response.body_mut() = Bytes::new();
    }
    response
}
