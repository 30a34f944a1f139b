// src/proxy/tunnel.rs
// Byte-level bridge for upgraded (websocket style) connections.

use hyper::header::{HeaderMap, CONNECTION, UPGRADE};
use hyper::upgrade::OnUpgrade;
use hyper::{Body, Response, StatusCode};
use tracing::{debug, warn, Instrument};

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE)
        && headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// If the upstream switched protocols, splice the client connection onto the
/// upstream one in a background task. Frames are copied opaquely until either
/// side closes. Any other response is left untouched.
pub fn splice(service: &str, inbound: OnUpgrade, response: &mut Response<Body>) {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return;
    }

    let outbound = hyper::upgrade::on(response);
    let service = service.to_string();
    tokio::spawn(
        async move {
            let (mut client, mut upstream) = match tokio::try_join!(inbound, outbound) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(service = %service, %err, "Connection upgrade failed");
                    return;
                }
            };
            debug!(service = %service, "Tunnel established");

            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((to_upstream, to_client)) => {
                    debug!(service = %service, to_upstream, to_client, "Tunnel closed")
                }
                Err(err) => debug!(service = %service, %err, "Tunnel closed with error"),
            }
        }
        .in_current_span(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use hyper::Request;

    #[test]
    fn test_detects_upgrade_requests() {
        let mut headers = HeaderMap::new();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade(&headers));

        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!is_upgrade(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
        assert!(!is_upgrade(&headers));
    }

    #[tokio::test]
    async fn test_non_switching_response_left_alone() {
        let inbound = hyper::upgrade::on(Request::new(Body::empty()));
        let mut response = Response::new(Body::from("nope"));
        *response.status_mut() = StatusCode::BAD_REQUEST;

        splice("notifications", inbound, &mut response);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"nope");
    }
}
