//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all log events via tracing spans
//! - Metrics are cheap (atomic increments)
//! - Metrics label routes by template path, never raw URL, to bound
//!   cardinality

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
