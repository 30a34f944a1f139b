// src/circuit_breaker/mod.rs
mod breaker;
mod registry;

pub use breaker::{
    BreakerRejection, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakerState,
};
pub use registry::BreakerRegistry;
