// src/lib.rs
pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod server;
pub mod transport;
