// src/transport/upstream.rs
// The network call a ResilientTransport decorates.

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_tls::HttpsConnector;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("upstream request failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("upstream unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, TransportError>;
}

/// Pooled hyper client speaking HTTP/1.1 (plain or TLS) to upstream services.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HyperUpstream {
    pub fn new() -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build(HttpsConnector::new_with_connector(http));

        Self { client }
    }
}

impl Default for HyperUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, TransportError> {
        match self.client.request(req).await {
            Ok(response) => Ok(response),
            Err(err) if err.is_connect() => Err(TransportError::Unreachable(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}
