//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the notifier:
//! - Deliveries received, acknowledged, redelivered and dead-lettered
//! - Decode failures
//! - Dispatch latency and failures by kind
//! - Broker settlement errors (commit, rewind, dead-letter publish)
//!
//! Metrics are advisory; nothing in the delivery contract depends on them.
//!
//! # Example
//!
//! ```rust,no_run
//! use notifier_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use notifier_core::dispatcher::FailureKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and exposes `/metrics` over HTTP for scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start the HTTP exporter.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or bound.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by an earlier test), this logs a
    /// warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // ExporterError carries no Debug or Display impl.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "notifier_events_received_total",
        "Total number of deliveries handed to the consumer"
    );
    describe_counter!(
        "notifier_events_acknowledged_total",
        "Total number of deliveries acknowledged after a successful dispatch"
    );
    describe_counter!(
        "notifier_redeliveries_requested_total",
        "Total number of deliveries left unacknowledged for redelivery"
    );
    describe_counter!(
        "notifier_events_dead_lettered_total",
        "Total number of deliveries routed to the dead-letter destination"
    );
    describe_counter!(
        "notifier_decode_failures_total",
        "Total number of payloads that could not be decoded"
    );
    describe_counter!(
        "notifier_dispatch_failures_total",
        "Total number of failed dispatches, labelled by failure kind"
    );
    describe_histogram!(
        "notifier_dispatch_duration_seconds",
        "Time taken by a single dispatch attempt"
    );
    describe_counter!(
        "notifier_settlement_errors_total",
        "Total number of ack, redelivery or dead-letter operations the broker rejected"
    );
}

/// Consumer-side metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a delivery handed to the consumer.
    pub fn record_received() {
        counter!("notifier_events_received_total").increment(1);
    }

    /// Record a payload that failed to decode.
    pub fn record_decode_failure() {
        counter!("notifier_decode_failures_total").increment(1);
    }

    /// Record the duration of one dispatch attempt.
    pub fn record_dispatch(duration: Duration) {
        histogram!("notifier_dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed dispatch.
    pub fn record_dispatch_failure(kind: FailureKind) {
        counter!("notifier_dispatch_failures_total", "kind" => kind.as_str()).increment(1);
    }

    /// Record an acknowledged delivery.
    pub fn record_acknowledged() {
        counter!("notifier_events_acknowledged_total").increment(1);
    }

    /// Record a redelivery request.
    pub fn record_redelivery_requested() {
        counter!("notifier_redeliveries_requested_total").increment(1);
    }

    /// Record a dead-lettered delivery.
    pub fn record_dead_lettered() {
        counter!("notifier_events_dead_lettered_total").increment(1);
    }

    /// Record a settlement the broker rejected.
    pub fn record_settlement_error() {
        counter!("notifier_settlement_errors_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_consumer_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ConsumerMetrics::record_received();
        ConsumerMetrics::record_dispatch(Duration::from_millis(40));
        ConsumerMetrics::record_dispatch_failure(FailureKind::Transient);
        ConsumerMetrics::record_redelivery_requested();

        // If another test installed the recorder first, handle is None.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("notifier_events_received_total"));
            assert!(rendered.contains("notifier_dispatch_failures_total"));
            assert!(rendered.contains("kind=\"transient\""));
        }
    }
}
