//! # bw-observability
//!
//! Logging and metrics infrastructure for Bridgewatch.
//!
//! This crate provides structured logging with tracing and metric
//! registration for the correlation engine's counters.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::register_engine_metrics;
