//! Metrics and Monitoring Adapters
//!
//! Prometheus counters plus the axum server exposing `/live`, `/ready`
//! and `/metrics`.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::IndexerMetrics;
