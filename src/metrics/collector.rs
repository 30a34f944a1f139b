// src/metrics/collector.rs
use crate::circuit_breaker::CircuitBreakerState;
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

/// How a single upstream attempt ended, as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLabel {
    Success,
    ClientError,
    Failure,
}

impl AttemptLabel {
    fn as_str(self) -> &'static str {
        match self {
            AttemptLabel::Success => "success",
            AttemptLabel::ClientError => "client_error",
            AttemptLabel::Failure => "failure",
        }
    }
}

pub struct MetricsCollector {
    // Gateway request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub active_requests: IntGauge,

    // Upstream metrics
    pub upstream_attempts_total: IntCounterVec,
    pub upstream_attempt_duration_seconds: HistogramVec,
    pub retries_total: IntCounterVec,

    // Circuit breaker metrics
    pub circuit_breaker_state: IntGaugeVec,
    pub circuit_breaker_rejections_total: IntCounterVec,

    pub registered_services: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Total number of gateway requests"),
            &["service", "method", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Gateway request duration in seconds, retries included",
            ),
            &["service", "method"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let active_requests =
            IntGauge::new("gateway_active_requests", "Requests currently being proxied")?;
        registry.register(Box::new(active_requests.clone()))?;

        let upstream_attempts_total = IntCounterVec::new(
            Opts::new("gateway_upstream_attempts_total", "Upstream attempts by outcome"),
            &["service", "outcome"],
        )?;
        registry.register(Box::new(upstream_attempts_total.clone()))?;

        let upstream_attempt_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_upstream_attempt_duration_seconds",
                "Duration of a single upstream attempt",
            ),
            &["service"],
        )?;
        registry.register(Box::new(upstream_attempt_duration_seconds.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new("gateway_retries_total", "Upstream attempts beyond the first"),
            &["service"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "gateway_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["service"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_rejections_total = IntCounterVec::new(
            Opts::new(
                "gateway_circuit_breaker_rejections_total",
                "Calls rejected without contacting the upstream",
            ),
            &["service"],
        )?;
        registry.register(Box::new(circuit_breaker_rejections_total.clone()))?;

        let registered_services =
            IntGauge::new("gateway_registered_services", "Number of routed upstream services")?;
        registry.register(Box::new(registered_services.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            active_requests,
            upstream_attempts_total,
            upstream_attempt_duration_seconds,
            retries_total,
            circuit_breaker_state,
            circuit_breaker_rejections_total,
            registered_services,
        })
    }

    pub fn record_request(&self, service: &str, method: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[service, method, &status])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[service, method])
            .observe(duration.as_secs_f64());
    }

    pub fn record_attempt(&self, service: &str, outcome: AttemptLabel, duration: Duration) {
        self.upstream_attempts_total
            .with_label_values(&[service, outcome.as_str()])
            .inc();

        self.upstream_attempt_duration_seconds
            .with_label_values(&[service])
            .observe(duration.as_secs_f64());
    }

    pub fn record_retry(&self, service: &str) {
        self.retries_total.with_label_values(&[service]).inc();
    }

    pub fn record_rejection(&self, service: &str) {
        self.circuit_breaker_rejections_total
            .with_label_values(&[service])
            .inc();
    }

    pub fn update_circuit_breaker_state(&self, service: &str, state: CircuitBreakerState) {
        let value = match state {
            CircuitBreakerState::Closed => 0,
            CircuitBreakerState::Open => 1,
            CircuitBreakerState::HalfOpen => 2,
        };

        self.circuit_breaker_state
            .with_label_values(&[service])
            .set(value);
    }

    pub fn increment_active_requests(&self) {
        self.active_requests.inc();
    }

    pub fn decrement_active_requests(&self) {
        self.active_requests.dec();
    }

    pub fn set_registered_services(&self, count: usize) {
        self.registered_services.set(count as i64);
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_recorded_metrics() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request("tasks", "GET", 200, Duration::from_millis(5));
        metrics.record_attempt("tasks", AttemptLabel::Failure, Duration::from_millis(2));
        metrics.update_circuit_breaker_state("tasks", CircuitBreakerState::Open);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("gateway_requests_total"));
        assert!(text.contains(r#"outcome="failure""#));
        assert!(text.contains(r#"gateway_circuit_breaker_state{service="tasks"} 1"#));
    }
}
