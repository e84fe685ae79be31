//! Prometheus metrics for observability and monitoring.
//!
//! Covers the two moving parts of a host:
//! - registry operations and lifecycle transitions
//! - HTTP requests through the dispatcher, including long-poll re-checks
//!
//! # Example
//!
//! ```rust,no_run
//! use svchost_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Buckets for every `*_duration_seconds` histogram, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The Prometheus exporter could not be built.
    #[error("Failed to build metrics exporter: {0}")]
    Build(#[from] BuildError),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves the scrape endpoint on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the exporter and start its HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or its listener cannot
    /// bind. A recorder that is already installed (e.g. in tests) is tolerated.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                DURATION_BUCKETS,
            )?
            .build()?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        let addr = self.addr;
        tokio::spawn(async move {
            if let Err(_e) = exporter.await {
                // ExporterError (metrics-exporter-prometheus 0.15) implements neither Debug nor Display.
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Registry Metrics
    describe_counter!(
        "services_registered_total",
        "Total number of services registered"
    );
    describe_counter!(
        "services_unregistered_total",
        "Total number of services unregistered"
    );
    describe_gauge!("services_active", "Number of services currently registered");
    describe_counter!(
        "dependency_wait_timeouts_total",
        "Total number of factories that gave up waiting for dependencies"
    );
    describe_counter!(
        "lifecycle_transitions_total",
        "Total number of lifecycle transitions, by phase and outcome"
    );
    describe_histogram!(
        "lifecycle_transition_duration_seconds",
        "Time taken by lifecycle hooks"
    );

    // HTTP Metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "Time taken to answer HTTP requests"
    );
    describe_counter!(
        "long_poll_rechecks_total",
        "Total number of long-poll re-checks"
    );
}

/// Registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record a registration.
    pub fn record_registered(active: usize) {
        counter!("services_registered_total").increment(1);
        Self::record_active(active);
    }

    /// Record an unregistration.
    pub fn record_unregistered(active: usize) {
        counter!("services_unregistered_total").increment(1);
        Self::record_active(active);
    }

    /// Record a dependency wait that ran out.
    pub fn record_dependency_timeout() {
        counter!("dependency_wait_timeouts_total").increment(1);
    }

    /// Record a finished lifecycle transition.
    pub fn record_transition(phase: &'static str, ok: bool, duration: Duration) {
        let outcome = if ok { "ok" } else { "error" };
        counter!("lifecycle_transitions_total", "phase" => phase, "outcome" => outcome)
            .increment(1);
        histogram!("lifecycle_transition_duration_seconds", "phase" => phase)
            .record(duration.as_secs_f64());
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(active: usize) {
        gauge!("services_active").set(active as f64);
    }
}

/// HTTP metrics recorder.
pub struct HttpMetrics;

impl HttpMetrics {
    /// Record an answered request.
    pub fn record_request(method: &str, status: u16, duration: Duration) {
        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "method" => method.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a long-poll re-check.
    pub fn record_long_poll_recheck() {
        counter!("long_poll_rechecks_total").increment(1);
    }
}
