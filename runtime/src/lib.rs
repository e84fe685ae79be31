//! # svchost Runtime
//!
//! Runtime side of the svchost service host.
//!
//! This crate provides the [`ServiceRegistry`], which constructs services in
//! dependency order and drives them through their lifecycle, plus the
//! supporting retry policy and Prometheus metrics.
//!
//! ## Core Components
//!
//! - **`ServiceRegistry`**: dependency injection and Configure → Initialize → Run orchestration
//! - **`RetryPolicy`**: exponential backoff for dependency waits
//! - **Metrics**: registry and HTTP counters with an optional Prometheus exporter
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use svchost_core::Service;
//! use svchost_runtime::ServiceRegistry;
//!
//! struct Greeter;
//! impl Service for Greeter {}
//!
//! let registry = ServiceRegistry::new();
//! let id = registry.register_instance(Arc::new(Greeter));
//! assert_eq!(registry.name_of(id).as_deref(), Some("Greeter"));
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Service registry and lifecycle orchestration
pub mod registry;

pub use registry::{Registration, RegistryEvent, Selector, ServiceRegistry};
pub use retry::RetryPolicy;
