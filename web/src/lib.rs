//! HTTP side of the svchost service host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Transport (Axum fallback)        │  ← one RequestContext per request
//! ├─────────────────────────────────────────┤
//! │   RequestDispatcher (handler chain)     │
//! │  - CoreHandler                          │  ← CORS, ETag/304, long polling,
//! │                                         │    error envelopes, access log
//! │  - Basic / Bearer auth (optional)       │  ← 401 + WWW-Authenticate
//! │  - ProtocolHandler                      │  ← walks the served object graph
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **HTTP request** arrives at the Axum fallback
//! 2. **Build context**: method, URI, headers, peer, lazy size-capped body
//! 3. **Dispatch** through the chain
//! 4. **Resolve** the path against the served service and execute it
//! 5. **Encode** the result as an envelope with `$ref`, `$type` and `$hash`
//! 6. **Render** pretty JSON, with caching headers and CORS
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use std::sync::Arc;
//! use svchost_runtime::ServiceRegistry;
//! use svchost_testing::fixtures::EchoService;
//! use svchost_web::HostServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ServiceRegistry::new());
//! registry.register_instance(Arc::new(EchoService));
//!
//! let config = json!({"listen": "EchoService"});
//! registry.config_all(&config).await?;
//! registry.init_all().await?;
//! registry.run_all().await?;
//!
//! let server = HostServer::from_config(registry, &config)?;
//! server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod core_handler;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export key types for convenience
pub use core_handler::{CoreConfig, CoreHandler};
pub use dispatcher::{RequestDispatcher, render_json};
pub use error::ErrorEnvelope;
pub use protocol::ProtocolHandler;
pub use server::{HostConfig, HostServer, NoopHandler, router};
pub use svchost_core::{HandlerFuture, Next, Reply, RequestHandler};
