// src/transport/resilient.rs
// Retry + circuit breaker composition around an Upstream.

use super::upstream::{TransportError, Upstream};
use crate::circuit_breaker::BreakerRegistry;
use crate::metrics::{AttemptLabel, MetricsCollector, Timer};
use crate::proxy::GatewayError;
use crate::retry::{RetryDecision, RetryPolicy};
use hyper::body::Bytes;
use hyper::http::request::Parts;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Result of one forwarding attempt. Never leaves the request path.
///
/// Breaker rejections never produce an outcome; they surface directly as
/// [`GatewayError::BreakerOpen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOutcome {
    pub succeeded: bool,
    pub status_code: Option<u16>,
    pub transport_error: Option<String>,
}

impl ProxyOutcome {
    pub fn classify(result: &Result<Response<Body>, TransportError>) -> Self {
        match result {
            Ok(response) => {
                let status = response.status();
                Self {
                    succeeded: !status.is_server_error(),
                    status_code: Some(status.as_u16()),
                    transport_error: None,
                }
            }
            Err(err) => Self {
                succeeded: false,
                status_code: None,
                transport_error: Some(err.to_string()),
            },
        }
    }

    /// 5xx responses and transport errors.
    pub fn retry_decision(&self) -> RetryDecision {
        if self.succeeded {
            return RetryDecision::NoRetry;
        }
        match self.status_code {
            Some(code) => hyper::StatusCode::from_u16(code)
                .map(RetryPolicy::is_retryable_status)
                .unwrap_or(RetryDecision::NoRetry),
            None => RetryDecision::Retry,
        }
    }

    fn label(&self) -> AttemptLabel {
        match self.status_code {
            _ if !self.succeeded => AttemptLabel::Failure,
            Some(code) if (400..500).contains(&code) => AttemptLabel::ClientError,
            _ => AttemptLabel::Success,
        }
    }
}

enum Payload {
    Replayable(Bytes),
    Once(Option<Body>),
}

impl Payload {
    fn next(&mut self) -> Body {
        match self {
            Payload::Replayable(bytes) => Body::from(bytes.clone()),
            Payload::Once(body) => body.take().unwrap_or_else(Body::empty),
        }
    }
}

pub struct ResilientTransport {
    upstream: Arc<dyn Upstream>,
    breakers: Arc<BreakerRegistry>,
    policy: RetryPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ResilientTransport {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        breakers: Arc<BreakerRegistry>,
        policy: RetryPolicy,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self {
            upstream,
            breakers,
            policy,
            metrics,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Forward `req` to `service`, retrying idempotent requests on 5xx or
    /// transport failure while the service's breaker allows it.
    ///
    /// Upstream responses of any status come back as `Ok`; only
    /// gateway-originated failures are `Err`. Dropping the returned future
    /// abandons the in-flight attempt without charging the breaker.
    pub async fn execute(
        &self,
        req: Request<Body>,
        service: &str,
    ) -> Result<Response<Body>, GatewayError> {
        let max_attempts = self.policy.attempts_for(req.method());
        self.run(req, service, max_attempts).await
    }

    /// One breaker-guarded attempt with the body streamed as-is. Used for
    /// protocol upgrades, which must not be replayed.
    pub async fn execute_once(
        &self,
        req: Request<Body>,
        service: &str,
    ) -> Result<Response<Body>, GatewayError> {
        self.run(req, service, 1).await
    }

    async fn run(
        &self,
        req: Request<Body>,
        service: &str,
        max_attempts: u32,
    ) -> Result<Response<Body>, GatewayError> {
        let breaker = self.breakers.get(service);
        let (parts, body) = req.into_parts();

        let mut payload = if max_attempts > 1 {
            let bytes = hyper::body::to_bytes(body)
                .await
                .map_err(GatewayError::InboundBody)?;
            Payload::Replayable(bytes)
        } else {
            Payload::Once(Some(body))
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejection) => {
                    debug!(service, %rejection, attempt, "Call rejected by circuit breaker");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rejection(service);
                    }
                    return Err(GatewayError::BreakerOpen {
                        service: service.to_string(),
                        rejection,
                    });
                }
            };

            let request = rebuild(&parts, payload.next());
            let timer = Timer::new();
            let result = match timeout(self.policy.per_attempt_timeout(), self.upstream.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.per_attempt_timeout())),
            };

            let outcome = ProxyOutcome::classify(&result);
            permit.record(outcome.succeeded);

            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(service, outcome.label(), timer.elapsed());
                metrics.update_circuit_breaker_state(service, breaker.get_state());
            }

            if outcome.retry_decision() == RetryDecision::NoRetry {
                return result.map_err(|source| upstream_error(service, source));
            }

            if attempt >= max_attempts {
                warn!(
                    service,
                    attempt,
                    status = ?outcome.status_code,
                    error = ?outcome.transport_error,
                    "Upstream attempt failed, giving up"
                );
                return result.map_err(|source| upstream_error(service, source));
            }

            debug!(
                service,
                attempt,
                status = ?outcome.status_code,
                error = ?outcome.transport_error,
                "Upstream attempt failed, retrying in {:?}",
                self.policy.inter_attempt_delay()
            );
            drop(result);
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(service);
            }
            sleep(self.policy.inter_attempt_delay()).await;
        }
    }
}

fn upstream_error(service: &str, source: TransportError) -> GatewayError {
    GatewayError::Upstream {
        service: service.to_string(),
        source,
    }
}

fn rebuild(parts: &Parts, body: Body) -> Request<Body> {
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request
}
