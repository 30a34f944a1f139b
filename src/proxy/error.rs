// src/proxy/error.rs
// Gateway-originated failures and their client-facing JSON envelopes.

use crate::circuit_breaker::BreakerRejection;
use crate::transport::TransportError;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};

pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "Service temporarily unavailable. Please try again later.";
pub const BAD_GATEWAY_MESSAGE: &str = "Bad Gateway";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("circuit breaker for {service} rejected the call: {rejection}")]
    BreakerOpen {
        service: String,
        rejection: BreakerRejection,
    },

    #[error("upstream {service} failed: {source}")]
    Upstream {
        service: String,
        #[source]
        source: TransportError,
    },

    #[error("could not build upstream request: {0}")]
    Director(String),

    #[error("failed to read request body: {0}")]
    InboundBody(#[source] hyper::Error),

    #[error("no route matches {0}")]
    NoRoute(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub message: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. } | GatewayError::Director(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InboundBody(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoRoute(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn translate(&self) -> (StatusCode, ErrorEnvelope) {
        let status = self.status();
        let message = match self {
            GatewayError::BreakerOpen { .. } => SERVICE_UNAVAILABLE_MESSAGE,
            GatewayError::Upstream { .. } | GatewayError::Director(_) => BAD_GATEWAY_MESSAGE,
            GatewayError::InboundBody(_) => "Bad Request",
            GatewayError::NoRoute(_) => "Not Found",
        };

        (
            status,
            ErrorEnvelope {
                code: status.as_u16(),
                message: message.to_string(),
            },
        )
    }
}

impl From<GatewayError> for Response<Body> {
    fn from(err: GatewayError) -> Self {
        let (status, envelope) = err.translate();
        let body = serde_json::to_vec(&envelope).unwrap_or_default();

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
