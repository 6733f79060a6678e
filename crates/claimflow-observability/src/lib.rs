//! ClaimFlow Observability
//!
//! Prometheus metrics for the ingestion pipeline.
//!
//! # Usage
//!
//! ```no_run
//! use claimflow_observability::{exporter, metrics};
//!
//! // Register metrics once at startup
//! metrics::init();
//!
//! metrics::RECORDS_PUBLISHED_TOTAL.inc();
//!
//! // Dump the registry
//! println!("{}", exporter::gather_text().unwrap());
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::gather_text;
pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
