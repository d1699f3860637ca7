//! Prometheus metrics for the Cosmo Tech operator
//!
//! This module exposes metrics for monitoring operator health and
//! reconciliation throughput.

mod prometheus;

pub use prometheus::*;
