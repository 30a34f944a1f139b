// src/circuit_breaker/registry.rs

use super::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use std::sync::Arc;

/// Per-service circuit breaker management.
///
/// Breakers are created on first use and live for the rest of the process.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        // Shared shard lock for the common case.
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(existing.value());
        }

        // Exclusive shard lock; `entry` re-checks before constructing.
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                tracing::debug!(service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, self.config.clone()))
            })
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}
