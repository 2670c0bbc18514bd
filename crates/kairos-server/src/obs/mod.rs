//! Observability: metric registry and periodic reporting.

pub mod metrics;

pub use metrics::ServerMetrics;
