//! Host assembly and the Axum transport adapter.
//!
//! [`HostServer::from_config`] builds the handler chain a host runs:
//!
//! ```text
//! core → [basic auth] → [bearer auth] → protocol (listened service) | no-op
//! ```
//!
//! [`router`] turns every inbound HTTP request into a [`RequestContext`] and
//! hands it to the dispatcher. There are no routes.

use crate::core_handler::{CoreConfig, CoreHandler};
use crate::dispatcher::RequestDispatcher;
use crate::protocol::ProtocolHandler;
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use http::StatusCode;
use http::header::CONTENT_LENGTH;
use http_body_util::LengthLimitError;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use svchost_auth::config::has_section;
use svchost_auth::{BasicAuthConfig, BasicAuthHandler, BearerAuthConfig, BearerAuthHandler};
use svchost_core::{
    DEFAULT_BODY_LIMIT, HandlerFuture, HostError, Next, Reply, RequestContext, RequestHandler,
    Result,
};
use svchost_runtime::{Selector, ServiceRegistry};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Default listen address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Transport settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    addr: SocketAddr,
    base_url: Option<String>,
    body_limit: usize,
    core: CoreConfig,
}

impl HostConfig {
    /// Defaults: `0.0.0.0:3000`, origin from request headers, 1 MB bodies.
    #[must_use]
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            base_url: None,
            body_limit: DEFAULT_BODY_LIMIT,
            core: CoreConfig::new(),
        }
    }

    /// Read `SVCHOST_ADDR`, `SVCHOST_BASE_URL`, `SVCHOST_BODY_LIMIT` and the
    /// core handler variables.
    ///
    /// # Errors
    ///
    /// [`HostError::Validation`] if `SVCHOST_ADDR` or `SVCHOST_BODY_LIMIT` is
    /// set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new().with_core(CoreConfig::from_env());
        if let Ok(addr) = std::env::var("SVCHOST_ADDR") {
            config.addr = addr
                .trim()
                .parse()
                .map_err(|e| HostError::Validation(format!("SVCHOST_ADDR={addr}: {e}")))?;
        }
        if let Ok(base_url) = std::env::var("SVCHOST_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = Some(base_url.trim().to_string());
            }
        }
        if let Ok(limit) = std::env::var("SVCHOST_BODY_LIMIT") {
            config.body_limit = limit
                .trim()
                .parse()
                .map_err(|e| HostError::Validation(format!("SVCHOST_BODY_LIMIT={limit}: {e}")))?;
        }
        Ok(config)
    }

    /// Listen address.
    #[must_use]
    pub const fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Fixed origin for `$ref` links.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Request body cap in bytes.
    #[must_use]
    pub const fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Core handler settings.
    #[must_use]
    pub const fn with_core(mut self, core: CoreConfig) -> Self {
        self.core = core;
        self
    }

    /// Listen address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Request body cap in bytes.
    #[must_use]
    pub const fn body_limit(&self) -> usize {
        self.body_limit
    }

    /// Core handler settings.
    #[must_use]
    pub const fn core(&self) -> &CoreConfig {
        &self.core
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Ends the chain with an empty 200. Used when no service is listened to.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl RequestHandler for NoopHandler {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_request<'a>(&'a self, _ctx: &'a Arc<RequestContext>, _next: Next<'a>) -> HandlerFuture<'a> {
        Box::pin(async { Ok(Reply::Empty(StatusCode::OK)) })
    }
}

/// An assembled host: dispatcher chain plus transport settings.
#[derive(Debug)]
pub struct HostServer {
    dispatcher: Arc<RequestDispatcher>,
    config: HostConfig,
    listen: Option<Selector>,
}

impl HostServer {
    /// Assemble with default transport settings.
    ///
    /// # Errors
    ///
    /// As [`HostServer::from_config_with`].
    pub fn from_config(registry: Arc<ServiceRegistry>, config: &Value) -> Result<Self> {
        Self::from_config_with(registry, config, HostConfig::new())
    }

    /// Assemble the chain described by the host configuration.
    ///
    /// - `auth.basic` / `auth.bearer` enable the auth handlers; a handler
    ///   already registered as a service is reused.
    /// - `listen` names the served service: a name, an id, or `true` for the
    ///   first registered service exposing an object graph. Absent, `null` or
    ///   `false` behave like `true`. Without any such service the chain ends
    ///   in a [`NoopHandler`].
    ///
    /// # Errors
    ///
    /// [`HostError::Validation`] for malformed auth sections or `listen`
    /// values, [`HostError::NotFound`] if the listened service is missing.
    pub fn from_config_with(
        registry: Arc<ServiceRegistry>,
        config: &Value,
        host: HostConfig,
    ) -> Result<Self> {
        let dispatcher = Arc::new(RequestDispatcher::new().with_production(host.core.production()));
        dispatcher.register(Arc::new(CoreHandler::new(host.core)));

        if has_section(config, "basic", "authBasic") {
            dispatcher.register(basic_handler(&registry, config)?);
        }
        if has_section(config, "bearer", "authBearer") {
            dispatcher.register(bearer_handler(&registry, config)?);
        }

        let listen = listen_selector(&registry, config.get("listen"))?;
        match &listen {
            Some(selector) => {
                registry.get_exposed(selector.clone())?;
                tracing::info!(service = %selector, "Serving service object graph");
                dispatcher.register(Arc::new(ProtocolHandler::new(
                    Arc::clone(&registry),
                    selector.clone(),
                )));
            }
            None => {
                tracing::warn!("No service exposes an object graph; requests end in a no-op handler");
                dispatcher.register(Arc::new(NoopHandler));
            }
        }

        Ok(Self {
            dispatcher,
            config: host,
            listen,
        })
    }

    /// The assembled chain.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    /// Service being served, if any.
    #[must_use]
    pub const fn listen(&self) -> Option<&Selector> {
        self.listen.as_ref()
    }

    /// Transport settings.
    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Axum router for this host.
    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.dispatcher), &self.config)
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.addr).await?;
        tracing::info!(
            address = %listener.local_addr()?,
            service = %self.listen.as_ref().map_or_else(|| "-".to_string(), ToString::to_string),
            "Server listening"
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

fn basic_handler(registry: &ServiceRegistry, config: &Value) -> Result<Arc<dyn RequestHandler>> {
    if let Ok(handler) = registry.get_by_type::<BasicAuthHandler>() {
        if !handler.is_configured() {
            handler.configure(&BasicAuthConfig::from_host_config(config)?)?;
        }
        return Ok(handler);
    }
    Ok(Arc::new(BasicAuthHandler::from_config(
        &BasicAuthConfig::from_host_config(config)?,
    )?))
}

fn bearer_handler(registry: &ServiceRegistry, config: &Value) -> Result<Arc<dyn RequestHandler>> {
    if let Ok(handler) = registry.get_by_type::<BearerAuthHandler>() {
        if !handler.is_configured() {
            handler.configure(&BearerAuthConfig::from_host_config(config)?);
        }
        return Ok(handler);
    }
    Ok(Arc::new(BearerAuthHandler::from_config(
        &BearerAuthConfig::from_host_config(config)?,
    )))
}

fn listen_selector(registry: &ServiceRegistry, listen: Option<&Value>) -> Result<Option<Selector>> {
    match listen {
        Some(Value::String(name)) if !name.trim().is_empty() => {
            let name = name.trim();
            Ok(Some(Uuid::parse_str(name).map_or_else(
                |_| Selector::from(name),
                Selector::Id,
            )))
        }
        None | Some(Value::Null | Value::Bool(_) | Value::String(_)) => Ok(registry
            .handles()
            .into_iter()
            .find(|(_, handle)| handle.exposed().is_some())
            .map(|(id, _)| Selector::Id(id))),
        Some(other) => Err(HostError::Validation(format!(
            "listen must be a service name, an id or true, got {other}"
        ))),
    }
}

#[derive(Clone)]
struct AdapterState {
    dispatcher: Arc<RequestDispatcher>,
    base_url: Option<String>,
    body_limit: usize,
}

/// Router sending every request through `dispatcher`.
pub fn router(dispatcher: Arc<RequestDispatcher>, config: &HostConfig) -> Router {
    let state = AdapterState {
        dispatcher,
        base_url: config.base_url.clone(),
        body_limit: config.body_limit,
    };
    Router::new()
        .fallback(handle)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn handle(State(state): State<AdapterState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let declared_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let limit = state.body_limit;
    let mut builder = RequestContext::builder(parts.method, parts.uri)
        .headers(parts.headers)
        .body_future(Box::pin(async move {
            if declared_length.is_some_and(|length| length > limit) {
                return Err(too_large(limit));
            }
            axum::body::to_bytes(body, limit).await.map_err(|err| {
                if is_length_limit(&err) {
                    too_large(limit)
                } else {
                    HostError::http_with_message(400, format!("Failed to read request body: {err}"))
                }
            })
        }));
    if let Some(addr) = remote_addr {
        builder = builder.remote_addr(addr);
    }
    if let Some(base_url) = &state.base_url {
        builder = builder.base_url(base_url.clone());
    }

    state.dispatcher.dispatch(builder.build()).await.map(Body::from)
}

fn too_large(limit: usize) -> HostError {
    HostError::http_with_message(413, format!("Request body exceeds {limit} bytes"))
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.downcast_ref::<LengthLimitError>().is_some() {
            return true;
        }
        source = current.source();
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn test_body_over_limit_is_recognised() {
        let err = axum::body::to_bytes(Body::from("far more than eight bytes"), 8)
            .await
            .unwrap_err();
        assert!(is_length_limit(&err));
    }

    #[tokio::test]
    async fn test_other_body_errors_are_not_length_limits() {
        let err = axum::Error::new(std::io::Error::other("length limit exceeded"));
        assert!(!is_length_limit(&err));

        let within = axum::body::to_bytes(Body::from("short"), 8).await.unwrap();
        assert_eq!(&within[..], b"short");
    }
}
