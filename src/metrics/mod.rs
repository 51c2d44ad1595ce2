// src/metrics/mod.rs
mod collector;
mod endpoint;

pub use collector::{MetricsCollector, MetricsRegistry};
pub use endpoint::MetricsHandler;
