// src/proxy/director.rs
// Turns an inbound gateway request into the request sent upstream.

use super::error::GatewayError;
use super::route::ServiceRoute;
use hyper::header::{HeaderValue, HOST};
use hyper::{Body, Request, Uri, Version};

pub const REQUEST_ID: &str = "x-request-id";

/// Rewrite `req` for `route`: upstream scheme and authority, prefix-rewritten
/// path, verbatim query string, every inbound header kept.
pub fn rewrite(req: Request<Body>, route: &ServiceRoute) -> Result<Request<Body>, GatewayError> {
    let (mut parts, body) = req.into_parts();

    let path = rewrite_path(parts.uri.path(), route);
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    let authority = route.authority();
    parts.uri = Uri::builder()
        .scheme(route.upstream_scheme.as_str())
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::Director(e.to_string()))?;

    let host = HeaderValue::from_str(&authority).map_err(|e| GatewayError::Director(e.to_string()))?;
    parts.headers.insert(HOST, host);

    if !parts.headers.contains_key(REQUEST_ID) {
        let id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            parts.headers.insert(REQUEST_ID, value);
        }
    }

    parts.version = Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}

pub fn rewrite_path(path: &str, route: &ServiceRoute) -> String {
    if let Some(fixed) = &route.fixed_path {
        return fixed.clone();
    }
    if route.source_prefix.is_empty() || route.target_prefix.is_empty() {
        return path.to_string();
    }
    path.replacen(&route.source_prefix, &route.target_prefix, 1)
}
