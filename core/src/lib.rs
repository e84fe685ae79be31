//! # svchost Core
//!
//! Core traits and types for the svchost service host.
//!
//! A host loads independently written services, wires their dependencies,
//! drives them through an ordered startup protocol and exposes one service's
//! live object graph over HTTP. This crate holds the vocabulary every other
//! crate shares.
//!
//! ## Core Concepts
//!
//! - **Service**: a `Send + Sync` value with optional configure/initialize/run hooks
//! - **Factory**: constructs a service once the services it names exist
//! - **Exposed**: an object that can describe its members to the protocol layer
//! - **Node**: one value in an exposed graph (data, date, function, object)
//! - **`RequestContext`**: per-request state shared by a handler chain
//! - **`RequestHandler`**: one stage of a dispatcher chain
//! - **`HostError`**: the error taxonomy shared by registry and protocol
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use svchost_core::{Description, Exposed, Function, Node, Service};
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn exposed(self: Arc<Self>) -> Option<Arc<dyn Exposed>> {
//!         Some(self)
//!     }
//! }
//!
//! impl Exposed for Echo {
//!     fn describe(self: Arc<Self>) -> Description {
//!         Description::new().method(
//!             "echo",
//!             Function::sync(&["value"], |mut args| {
//!                 Ok(args.drain(..).next().map_or(Node::Undefined, Node::Data))
//!             }),
//!         )
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};

pub mod context;
pub mod error;
pub mod handler;
pub mod reflect;
pub mod service;

pub use context::{BodyFuture, DEFAULT_BODY_LIMIT, RequestContext, RequestContextBuilder};
pub use error::{HostError, Result};
pub use handler::{HandlerFuture, Next, Reply, RequestHandler};
pub use reflect::{CallFuture, Description, Exposed, Function, Layer, MethodHandler, Node};
pub use service::{
    Dependencies, DynFactory, FnFactory, HookFuture, Phase, Service, ServiceConfig,
    ServiceFactory, ServiceHandle, factory, short_type_name,
};
