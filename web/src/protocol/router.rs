//! Resolves request paths against a live object graph.

use super::envelope::encode;
use super::path::{is_private, split_path};
use http::Method;
use serde_json::Value;
use std::sync::Arc;
use svchost_core::{
    Exposed, HandlerFuture, HostError, Next, Node, Reply, RequestContext, RequestHandler, Result,
};
use svchost_runtime::{Selector, ServiceRegistry};

/// Serves the object graph of one registered service.
///
/// The service is looked up on every request, so a re-registered service is
/// picked up without rebuilding the chain.
pub struct ProtocolHandler {
    registry: Arc<ServiceRegistry>,
    selector: Selector,
}

impl ProtocolHandler {
    /// Serve the service matching `selector`.
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, selector: impl Into<Selector>) -> Self {
        Self {
            registry,
            selector: selector.into(),
        }
    }

    /// Service being served.
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    async fn handle(&self, ctx: &Arc<RequestContext>) -> Result<Reply> {
        let root = self.registry.get_exposed(self.selector.clone())?;
        let node = resolve(ctx, root).await?;
        Ok(Reply::Body(encode(&node, &ctx.reference(None))?))
    }
}

impl RequestHandler for ProtocolHandler {
    fn name(&self) -> &str {
        "protocol"
    }

    fn on_request<'a>(&'a self, ctx: &'a Arc<RequestContext>, _next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(self.handle(ctx))
    }
}

impl std::fmt::Debug for ProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolHandler")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Walk the request path from `root` and execute the addressed member.
///
/// # Errors
///
/// - 404 for private, missing or `null` members
/// - 405 for a method the addressed member does not accept
/// - 400 for a malformed call body
/// - whatever a called function or custom handler returns
pub async fn resolve(ctx: &Arc<RequestContext>, root: Arc<dyn Exposed>) -> Result<Node> {
    let method = ctx.method();
    let segments = split_path(ctx.path())?;
    let mut remaining = segments.iter();
    let mut node = Node::Object(root);
    let mut called = false;

    loop {
        if let Node::Function(function) = &node {
            if method == Method::POST {
                let args = call_args(ctx).await?;
                tracing::debug!(request_id = %ctx.id(), args = args.len(), "Calling exposed function");
                let result = function.call(args).await?;
                if remaining.as_slice().is_empty() {
                    return Ok(result);
                }
                if result.is_absent() {
                    return Err(HostError::http(404));
                }
                node = result;
                called = true;
                continue;
            }
            if !is_read(method) {
                return Err(HostError::http(405));
            }
        }

        let Some(segment) = remaining.next() else {
            break;
        };
        if is_private(segment) {
            return Err(HostError::http(404));
        }
        node = node
            .child(segment)
            .filter(|child| !child.is_absent())
            .ok_or_else(|| HostError::http(404))?;
    }

    // Segments after a call read from its result.
    if called {
        return Ok(node);
    }
    if let Node::Object(object) = &node {
        if let Some(handler) = Arc::clone(object).describe().handler(method) {
            return handler(Arc::clone(ctx)).await;
        }
    }
    if is_read(method) {
        Ok(node)
    } else {
        Err(HostError::http(405))
    }
}

fn is_read(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Positional arguments from the optional `$args` array of a JSON body.
async fn call_args(ctx: &RequestContext) -> Result<Vec<Value>> {
    let Some(body) = ctx.json_body().await? else {
        return Ok(Vec::new());
    };
    match body.get("$args") {
        None => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args.clone()),
        Some(_) => Err(HostError::http_with_message(400, "$args must be an array")),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use serde_json::json;
    use svchost_testing::fixtures::EchoService;

    fn request(method: Method, path: &str, body: &str) -> Arc<RequestContext> {
        RequestContext::builder(method, path.parse().unwrap())
            .body(body.to_string())
            .build()
    }

    async fn data(method: Method, path: &str, body: &str) -> Value {
        match resolve(&request(method, path, body), Arc::new(EchoService)).await {
            Ok(Node::Data(value)) => value,
            other => panic!("expected data, got {other:?}"),
        }
    }

    async fn status(method: Method, path: &str, body: &str) -> u16 {
        resolve(&request(method, path, body), Arc::new(EchoService))
            .await
            .unwrap_err()
            .status_code()
    }

    #[tokio::test]
    async fn test_walks_nested_data() {
        assert_eq!(data(Method::GET, "/foo/bar", "").await, json!(42));
        assert_eq!(data(Method::GET, "/numbers/1", "").await, json!(2));
    }

    #[tokio::test]
    async fn test_root_resolves_to_object() {
        let node = resolve(&request(Method::GET, "/", ""), Arc::new(EchoService))
            .await
            .unwrap();
        assert!(matches!(node, Node::Object(_)));
    }

    #[tokio::test]
    async fn test_private_and_missing_are_not_found() {
        assert_eq!(status(Method::GET, "/_secret", "").await, 404);
        assert_eq!(status(Method::GET, "/$hidden", "").await, 404);
        assert_eq!(status(Method::GET, "/constructor", "").await, 404);
        assert_eq!(status(Method::GET, "/missing", "").await, 404);
        assert_eq!(status(Method::GET, "/nothing", "").await, 404);
        assert_eq!(status(Method::GET, "/greeting/length", "").await, 404);
    }

    #[tokio::test]
    async fn test_post_calls_function() {
        assert_eq!(
            data(Method::POST, "/echo", r#"{"$args": ["hi"]}"#).await,
            json!("hi")
        );
        assert_eq!(data(Method::POST, "/ping", "").await, json!("pong"));
    }

    #[tokio::test]
    async fn test_post_continues_into_result() {
        assert_eq!(
            data(Method::POST, "/echo/k", r#"{"$args": [{"k": "v"}]}"#).await,
            json!("v")
        );
    }

    #[tokio::test]
    async fn test_call_without_result_is_undefined() {
        let node = resolve(&request(Method::POST, "/silent", ""), Arc::new(EchoService))
            .await
            .unwrap();
        assert!(matches!(node, Node::Undefined));
    }

    #[tokio::test]
    async fn test_get_reads_function_properties() {
        let node = resolve(&request(Method::GET, "/echo", ""), Arc::new(EchoService))
            .await
            .unwrap();
        assert!(matches!(node, Node::Function(_)));
        assert_eq!(
            data(Method::GET, "/echo/description", "").await,
            json!("Returns its argument")
        );
    }

    #[tokio::test]
    async fn test_bad_call_bodies() {
        assert_eq!(status(Method::POST, "/echo", "{not json").await, 400);
        assert_eq!(status(Method::POST, "/echo", r#"{"$args": 5}"#).await, 400);
    }

    #[tokio::test]
    async fn test_unsupported_methods() {
        assert_eq!(status(Method::DELETE, "/echo", "").await, 405);
        assert_eq!(status(Method::PUT, "/greeting", "").await, 405);
        assert_eq!(status(Method::POST, "/", "").await, 405);
    }

    #[tokio::test]
    async fn test_function_errors_propagate() {
        assert_eq!(status(Method::POST, "/teapot", "").await, 418);
        assert_eq!(status(Method::POST, "/fail", "").await, 500);
    }
}
