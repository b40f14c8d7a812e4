//! Prometheus metrics for ticket inventory.
//!
//! The services in `boxoffice-core` record through the `metrics` facade;
//! this module installs the Prometheus recorder, registers descriptions and
//! serves the scrape endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use boxoffice_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
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

    /// Install the recorder and spawn the HTTP listener on the current
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a different recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(%addr, "Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics server started - available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Reservations
    describe_counter!(
        "inventory_reservations_total",
        "Reservation attempts by outcome (held, insufficient_stock, sale_ended, ...)"
    );
    describe_counter!("inventory_units_held_total", "Units moved into held reservations");
    describe_counter!("inventory_releases_total", "Reservations released back to the pool");

    // Orders
    describe_counter!("orders_created_total", "Pending orders created");
    describe_counter!("orders_completed_total", "Orders completed by fulfillment");
    describe_counter!("orders_cancelled_total", "Orders cancelled, by reason (requested, expired)");
    describe_counter!("orders_refunded_total", "Completed orders refunded");
    describe_counter!("tickets_issued_total", "Tickets minted at fulfillment");
    describe_counter!(
        "fulfillment_duplicates_total",
        "Repeated payment confirmations answered idempotently"
    );
    describe_counter!(
        "fulfillment_conflicts_total",
        "Completions attempted with a different payment reference"
    );

    // Checkout
    describe_counter!("checkouts_started_total", "Checkouts that reached the payment page");
    describe_counter!(
        "checkout_compensations_total",
        "Checkouts unwound after a failed step, by step (reserve, create_order, payment)"
    );
    describe_counter!("payment_failures_total", "Failed payment confirmations");
    describe_counter!(
        "payments_unfulfilled_total",
        "Successful payments for orders that were no longer pending"
    );
    describe_counter!("inventory_lock_timeouts_total", "Transactions that gave up waiting for a row lock");

    // Sweeper
    describe_counter!("sweeper_runs_total", "Sweep passes finished");
    describe_counter!("sweeper_failures_total", "Orders or holds a sweep pass failed to reclaim");
    describe_histogram!("sweeper_pass_duration_seconds", "Time taken by one sweep pass");

    // Retry
    describe_counter!("retry_attempts_total", "Retries after a transient store error");
    describe_counter!("retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("retry_exhausted_total", "Operations that ran out of retries");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
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
    async fn test_started_server_renders_described_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();
        metrics::counter!("orders_created_total").increment(1);

        let rendered = server.render().unwrap();
        assert!(rendered.contains("orders_created_total"));
        assert!(matches!(server.start(), Err(MetricsError::Install(_))));
    }

    #[test]
    fn test_descriptions_without_recorder() {
        // Describing against the no-op recorder must not panic.
        register_metrics();
    }
}
