// src/metrics/mod.rs
mod collector;

pub use collector::{AttemptLabel, MetricsCollector, MetricsRegistry, Timer};
