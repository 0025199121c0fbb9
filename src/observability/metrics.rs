//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define loader metrics (throughput, latency, rejections, table size)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `route_requests_total` (counter): requests by method, path, status
//! - `route_request_duration_seconds` (histogram): latency distribution
//! - `validation_rejections_total` (counter): schema rejections by path
//! - `routes_registered` (gauge): size of the registered route table
//!
//! # Design Decisions
//! - Paths are labelled by route template, not by concrete URL, so
//!   cardinality is bounded by the config file
//! - Recording is fire-and-forget: a missing exporter drops the sample

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics endpoint started");
        }
        Err(error) => {
            tracing::error!(error = %error, "Failed to install metrics exporter");
        }
    }
}

/// Record one completed request.
pub fn record_request(method: &str, path: &str, status: u16, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];
    counter!("route_requests_total", &labels).increment(1);
    histogram!("route_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
}

/// Record a request rejected by schema validation.
pub fn record_validation_rejection(path: &str) {
    let labels = [("path", path.to_string())];
    counter!("validation_rejections_total", &labels).increment(1);
}

/// Record the number of routes in the registered table.
pub fn record_routes_registered(count: usize) {
    gauge!("routes_registered").set(count as f64);
}
