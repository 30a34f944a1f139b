// src/proxy/gateway.rs
use super::endpoint::GatewayProxy;
use super::error::GatewayError;
use super::route::ServiceRoute;
use crate::circuit_breaker::BreakerRegistry;
use crate::config::{Config, ConfigError};
use crate::metrics::{MetricsCollector, Timer};
use crate::retry::RetryPolicy;
use crate::transport::{HyperUpstream, ResilientTransport, Upstream};
use hyper::{Body, Request, Response};
use std::sync::Arc;

/// All registered service endpoints, sharing one breaker registry and one
/// upstream client.
pub struct Gateway {
    // Longest source prefix first.
    proxies: Vec<GatewayProxy>,
    breakers: Arc<BreakerRegistry>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Gateway {
    pub fn new(config: &Config, metrics: Option<Arc<MetricsCollector>>) -> Result<Self, ConfigError> {
        Self::with_upstream(config, Arc::new(HyperUpstream::new()), metrics)
    }

    pub fn with_upstream(
        config: &Config,
        upstream: Arc<dyn Upstream>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, ConfigError> {
        let routes = config
            .routes
            .iter()
            .map(ServiceRoute::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let breakers = Arc::new(BreakerRegistry::new(config.circuit_breaker.clone()));
        let policy = RetryPolicy::from_config(&config.retry)?;
        let transport = Arc::new(ResilientTransport::new(
            upstream,
            breakers.clone(),
            policy,
            metrics.clone(),
        ));

        let mut proxies: Vec<_> = routes
            .into_iter()
            .map(|route| {
                tracing::info!(
                    service = %route.service_name,
                    source_prefix = %route.source_prefix,
                    upstream = %route.authority(),
                    "Registered route"
                );
                GatewayProxy::new(route, transport.clone())
            })
            .collect();
        proxies.sort_by(|a, b| b.route().source_prefix.len().cmp(&a.route().source_prefix.len()));

        if let Some(metrics) = &metrics {
            metrics.set_registered_services(proxies.len());
        }

        Ok(Self {
            proxies,
            breakers,
            metrics,
        })
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn route_for(&self, path: &str) -> Option<&GatewayProxy> {
        self.proxies.iter().find(|proxy| proxy.route().matches(path))
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path().to_string();
        let Some(proxy) = self.route_for(&path) else {
            tracing::debug!(%path, "No route matched");
            return GatewayError::NoRoute(path).into();
        };

        let method = req.method().clone();
        let timer = Timer::new();
        let _active = ActiveRequest::start(self.metrics.as_deref());

        let response = proxy.handle(req).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_request(
                &proxy.route().service_name,
                method.as_str(),
                response.status().as_u16(),
                timer.elapsed(),
            );
        }
        response
    }
}

// Keeps the active request gauge right when a request is cancelled.
struct ActiveRequest<'a>(Option<&'a MetricsCollector>);

impl<'a> ActiveRequest<'a> {
    fn start(metrics: Option<&'a MetricsCollector>) -> Self {
        if let Some(metrics) = metrics {
            metrics.increment_active_requests();
        }
        Self(metrics)
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        if let Some(metrics) = self.0 {
            metrics.decrement_active_requests();
        }
    }
}
