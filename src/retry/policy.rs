// src/retry/policy.rs

use crate::config::{ConfigError, RetryConfig};
use hyper::{Method, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

/// Immutable retry settings shared by every upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    per_attempt_timeout: Duration,
    inter_attempt_delay: Duration,
    retryable_methods: Vec<Method>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        per_attempt_timeout: Duration,
        inter_attempt_delay: Duration,
        retryable_methods: Vec<Method>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            per_attempt_timeout,
            inter_attempt_delay,
            retryable_methods,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.max_attempts,
            config.per_attempt_timeout(),
            config.inter_attempt_delay(),
            config.methods()?,
        ))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    pub fn inter_attempt_delay(&self) -> Duration {
        self.inter_attempt_delay
    }

    /// Number of attempts a request with this method may make.
    pub fn attempts_for(&self, method: &Method) -> u32 {
        if self.is_retryable_method(method) {
            self.max_attempts
        } else {
            1
        }
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    /// Only upstream 5xx responses are worth another attempt.
    pub fn is_retryable_status(status: StatusCode) -> RetryDecision {
        if status.is_server_error() {
            RetryDecision::Retry
        } else {
            RetryDecision::NoRetry
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self::new(
            config.max_attempts,
            config.per_attempt_timeout(),
            config.inter_attempt_delay(),
            vec![Method::GET, Method::HEAD],
        )
    }
}
