// src/proxy/endpoint.rs
use super::director::{self, REQUEST_ID};
use super::route::ServiceRoute;
use super::tunnel;
use crate::transport::ResilientTransport;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

/// The gateway endpoint for one named upstream service.
pub struct GatewayProxy {
    route: ServiceRoute,
    transport: Arc<ResilientTransport>,
}

impl GatewayProxy {
    pub fn new(route: ServiceRoute, transport: Arc<ResilientTransport>) -> Self {
        Self { route, transport }
    }

    pub fn route(&self) -> &ServiceRoute {
        &self.route
    }

    /// Forward `req` upstream. Always produces a response: gateway failures
    /// are translated into JSON error envelopes.
    ///
    /// Upgrade requests get a single attempt, and a `101` from the upstream
    /// bridges the two connections.
    pub async fn handle(&self, mut req: Request<Body>) -> Response<Body> {
        let service = self.route.service_name.as_str();
        let client_upgrade =
            tunnel::is_upgrade(req.headers()).then(|| hyper::upgrade::on(&mut req));

        let outbound = match director::rewrite(req, &self.route) {
            Ok(outbound) => outbound,
            Err(err) => {
                warn!(service, %err, "Failed to rewrite request");
                return err.into();
            }
        };

        let request_id = outbound
            .headers()
            .get(REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let span = info_span!(
            "proxy",
            service,
            request_id = %request_id,
            method = %outbound.method(),
            path = %outbound.uri().path()
        );

        async move {
            let result = match client_upgrade {
                Some(inbound) => {
                    self.transport
                        .execute_once(outbound, service)
                        .await
                        .map(|mut response| {
                            tunnel::splice(service, inbound, &mut response);
                            response
                        })
                }
                None => self.transport.execute(outbound, service).await,
            };
            match result {
                Ok(response) => response,
                Err(err) => {
                    warn!(%err, "Returning gateway error");
                    err.into()
                }
            }
        }
        .instrument(span)
        .await
    }
}
