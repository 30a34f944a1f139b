// src/server/admin.rs
// Metrics and breaker inspection listener.

use crate::circuit_breaker::BreakerRegistry;
use crate::metrics::MetricsRegistry;
use anyhow::Result;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub const BREAKERS_PATH: &str = "/breakers";

#[derive(Clone)]
pub struct AdminState {
    pub metrics: Arc<MetricsRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics_path: Arc<str>,
}

pub async fn handle_admin(req: Request<Body>, state: &AdminState) -> Response<Body> {
    if req.method() != Method::GET {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let path = req.uri().path();
    if path == &*state.metrics_path {
        return match state.metrics.gather() {
            Ok(body) => with_type(Response::new(Body::from(body)), "text/plain; version=0.0.4"),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
    }

    if path == BREAKERS_PATH {
        return match serde_json::to_vec(&state.breakers.snapshots()) {
            Ok(body) => with_type(Response::new(Body::from(body)), "application/json"),
            Err(e) => {
                error!("Failed to encode breaker snapshots: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
    }

    plain(StatusCode::NOT_FOUND, "Not Found")
}

fn with_type(mut response: Response<Body>, content_type: &'static str) -> Response<Body> {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

/// Spawn the admin listener in the background.
pub async fn start_admin_server(addr: SocketAddr, state: AdminState) -> Result<()> {
    let make_service = hyper::service::make_service_fn(move |_| {
        let state = state.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle_admin(req, &state).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Admin server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Admin server error: {}", e);
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    fn state() -> AdminState {
        let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default()));
        breakers.get("tasks");
        AdminState {
            metrics: Arc::new(MetricsRegistry::new().unwrap()),
            breakers,
            metrics_path: Arc::from("/metrics"),
        }
    }

    async fn get(path: &str, state: &AdminState) -> Response<Body> {
        let req = Request::get(path).body(Body::empty()).unwrap();
        handle_admin(req, state).await
    }

    #[tokio::test]
    async fn test_breakers_endpoint_lists_snapshots() {
        let response = get(BREAKERS_PATH, &state()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let snapshots: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshots[0]["service"], "tasks");
        assert_eq!(snapshots[0]["state"], "closed");
        assert!(snapshots[0]["opened_at"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_and_unknown_path() {
        let state = state();
        state.metrics.collector().set_registered_services(2);

        let response = get("/metrics", &state).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("gateway_registered_services 2"));

        assert_eq!(get("/nope", &state).await.status(), StatusCode::NOT_FOUND);
    }
}
