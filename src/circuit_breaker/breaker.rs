// src/circuit_breaker/breaker.rs

use crate::config::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,     // Normal operation
    Open,       // Failing, rejecting requests
    HalfOpen,   // Testing if service recovered
}

/// Why a call was refused without reaching the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerRejection {
    #[error("circuit is open")]
    Open,

    #[error("half-open trial budget exhausted")]
    TrialBudgetExhausted,
}

struct Counters {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    window_requests: u32,
    window_failures: u32,
    window_started: Instant,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    // Bumped on every transition; permits from an older generation are ignored.
    generation: u64,
}

impl Counters {
    fn new() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            window_requests: 0,
            window_failures: 0,
            window_started: Instant::now(),
            opened_at: None,
            opened_at_wall: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
            generation: 0,
        }
    }

    fn transition(&mut self, state: CircuitBreakerState) {
        self.state = state;
        self.generation += 1;
        self.consecutive_failures = 0;
        self.window_requests = 0;
        self.window_failures = 0;
        self.window_started = Instant::now();
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;

        if state == CircuitBreakerState::Open {
            self.opened_at = Some(Instant::now());
            self.opened_at_wall = Some(Utc::now());
        } else if state == CircuitBreakerState::Closed {
            self.opened_at = None;
            self.opened_at_wall = None;
        }
    }
}

/// Circuit breaker guarding a single upstream service.
///
/// All counters live behind one mutex which is only held for the duration of a
/// bookkeeping step, never across an upstream call.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            counters: Mutex::new(Counters::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for permission to make one upstream attempt.
    ///
    /// The returned permit must be resolved with [`CallPermit::record`]; a
    /// permit dropped unresolved (cancelled request) counts for nothing.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, BreakerRejection> {
        let mut counters = self.lock();

        if counters.state == CircuitBreakerState::Open {
            let elapsed = counters
                .opened_at
                .map(|opened| opened.elapsed() >= self.config.reset_timeout())
                .unwrap_or(true);
            if !elapsed {
                return Err(BreakerRejection::Open);
            }
            counters.transition(CircuitBreakerState::HalfOpen);
            tracing::info!(service = %self.service, "Circuit breaker transitioned to half-open");
        }

        let trial = match counters.state {
            CircuitBreakerState::Closed => false,
            CircuitBreakerState::HalfOpen => {
                if counters.half_open_in_flight >= self.config.max_half_open_requests {
                    return Err(BreakerRejection::TrialBudgetExhausted);
                }
                counters.half_open_in_flight += 1;
                true
            }
            CircuitBreakerState::Open => return Err(BreakerRejection::Open),
        };

        Ok(CallPermit {
            breaker: Arc::clone(self),
            generation: counters.generation,
            trial,
            resolved: false,
        })
    }

    fn on_result(&self, generation: u64, succeeded: bool) {
        let mut counters = self.lock();
        if counters.generation != generation {
            return;
        }

        match counters.state {
            CircuitBreakerState::Closed => {
                if counters.window_started.elapsed() >= self.config.window() {
                    counters.window_requests = 0;
                    counters.window_failures = 0;
                    counters.window_started = Instant::now();
                }

                counters.window_requests += 1;
                if succeeded {
                    counters.consecutive_failures = 0;
                    return;
                }

                counters.window_failures += 1;
                counters.consecutive_failures += 1;

                if self.should_trip(&counters) {
                    tracing::warn!(
                        service = %self.service,
                        consecutive_failures = counters.consecutive_failures,
                        window_failures = counters.window_failures,
                        window_requests = counters.window_requests,
                        "Circuit breaker opened"
                    );
                    counters.transition(CircuitBreakerState::Open);
                }
            }
            CircuitBreakerState::HalfOpen => {
                counters.half_open_in_flight = counters.half_open_in_flight.saturating_sub(1);

                if !succeeded {
                    tracing::warn!(service = %self.service, "Half-open trial failed, reopening circuit");
                    counters.transition(CircuitBreakerState::Open);
                    return;
                }

                counters.half_open_successes += 1;
                if counters.half_open_successes >= self.config.half_open_success_threshold {
                    tracing::info!(service = %self.service, "Circuit breaker closed after successful recovery");
                    counters.transition(CircuitBreakerState::Closed);
                }
            }
            // Permits are never issued while open within the same generation.
            CircuitBreakerState::Open => {}
        }
    }

    fn on_abandoned(&self, generation: u64, trial: bool) {
        let mut counters = self.lock();
        if trial && counters.generation == generation {
            counters.half_open_in_flight = counters.half_open_in_flight.saturating_sub(1);
        }
    }

    fn should_trip(&self, counters: &Counters) -> bool {
        if counters.consecutive_failures >= self.config.consecutive_failure_threshold {
            return true;
        }
        counters.window_requests >= self.config.minimum_requests
            && f64::from(counters.window_failures) / f64::from(counters.window_requests)
                >= self.config.failure_ratio
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let counters = self.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: counters.state,
            consecutive_failures: counters.consecutive_failures,
            window_requests: counters.window_requests,
            window_failures: counters.window_failures,
            half_open_in_flight: counters.half_open_in_flight,
            opened_at: counters.opened_at_wall,
        }
    }
}

/// Point-in-time view of a breaker, served on the admin listener.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub window_requests: u32,
    pub window_failures: u32,
    pub half_open_in_flight: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Permission for exactly one upstream attempt.
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    resolved: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report the attempt's result back to the breaker.
    pub fn record(mut self, succeeded: bool) {
        self.resolved = true;
        self.breaker.on_result(self.generation, succeeded);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandoned(self.generation, self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            reset_timeout_ms: 50,
            ..CircuitBreakerConfig::default()
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("tasks", config()))
    }

    fn fail(breaker: &Arc<CircuitBreaker>, times: usize) {
        for _ in 0..times {
            breaker.try_acquire().unwrap().record(false);
        }
    }

    fn succeed(breaker: &Arc<CircuitBreaker>, times: usize) {
        for _ in 0..times {
            breaker.try_acquire().unwrap().record(true);
        }
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = breaker();

        fail(&breaker, 4);
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);

        fail(&breaker, 1);
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
        assert_eq!(breaker.try_acquire().err(), Some(BreakerRejection::Open));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = breaker();

        fail(&breaker, 4);
        succeed(&breaker, 1);
        fail(&breaker, 4);

        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 4);
    }

    #[test]
    fn test_ratio_rule_needs_minimum_volume() {
        let breaker = breaker();

        // 6 failures out of 9 is above the ratio but below the volume floor.
        for _ in 0..3 {
            fail(&breaker, 2);
            succeed(&breaker, 1);
        }
        assert_eq!(breaker.get_state(), CircuitBreakerState::Closed);

        // 10th request: 7/10 failed.
        fail(&breaker, 1);
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_single_early_failure_does_not_trip() {
        let breaker = breaker();
        fail(&breaker, 1);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitBreakerState::Closed);
        assert_eq!(snapshot.window_failures, 1);
        assert_eq!(snapshot.window_requests, 1);
    }

    #[tokio::test]
    async fn test_window_resets_after_interval() {
        let breaker = Arc::new(CircuitBreaker::new(
            "tasks",
            CircuitBreakerConfig {
                window_ms: 30,
                ..config()
            },
        ));

        for _ in 0..4 {
            fail(&breaker, 1);
            succeed(&breaker, 1);
        }
        assert_eq!(breaker.snapshot().window_requests, 8);

        tokio::time::sleep(Duration::from_millis(40)).await;
        fail(&breaker, 1);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.window_requests, 1);
        assert_eq!(snapshot.window_failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let breaker = breaker();
        fail(&breaker, 5);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_trial());
        assert_eq!(breaker.get_state(), CircuitBreakerState::HalfOpen);

        permit.record(true);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitBreakerState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.window_requests, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_restarts_timeout() {
        let breaker = breaker();
        fail(&breaker, 5);

        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.try_acquire().unwrap().record(false);

        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
        assert_eq!(breaker.try_acquire().err(), Some(BreakerRejection::Open));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_half_open_trial_budget() {
        let breaker = breaker();
        fail(&breaker, 5);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let trials: Vec<_> = (0..3).map(|_| breaker.try_acquire().unwrap()).collect();
        assert_eq!(
            breaker.try_acquire().err(),
            Some(BreakerRejection::TrialBudgetExhausted)
        );

        // Abandoning a trial frees its slot without counting anything.
        drop(trials);
        assert_eq!(breaker.snapshot().half_open_in_flight, 0);
        assert_eq!(breaker.get_state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_abandoned_permit_records_nothing() {
        let breaker = breaker();
        fail(&breaker, 4);

        drop(breaker.try_acquire().unwrap());

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.window_requests, 4);
        assert_eq!(snapshot.consecutive_failures, 4);
    }

    #[test]
    fn test_stale_permit_is_ignored() {
        let breaker = breaker();
        let stale = breaker.try_acquire().unwrap();

        fail(&breaker, 5);
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);

        stale.record(true);
        assert_eq!(breaker.get_state(), CircuitBreakerState::Open);
    }
}
