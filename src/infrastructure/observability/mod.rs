//! Push-based observability for the gateway.
//!
//! No HTTP scrape endpoint. A background task logs a periodic
//! structured JSON summary of webhook counters instead.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
