//! Request inspection.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the client sent none
//! - Derive the client identity used for admission: IP and API key
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The first `X-Forwarded-For` hop wins over the socket address, since the
//!   service is expected to run behind a load balancer

use std::net::SocketAddr;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
pub const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Identity used when no address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Issues UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The request ID header value, or "unknown".
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNKNOWN_CLIENT)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// socket peer, then [`UNKNOWN_CLIENT`].
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header_str(headers, &X_REAL_IP) {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// API key from `X-API-Key`, else `Authorization: Bearer <key>`.
pub fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = header_str(headers, &X_API_KEY) {
        return Some(key.to_string());
    }
    bearer_token(headers).map(str::to_string)
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, &header::AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();

        let h = headers(&[("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, Some(peer)), "203.0.113.7");

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&h, Some(peer)), "198.51.100.2");

        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "10.0.0.9");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_api_key_sources() {
        assert_eq!(api_key(&headers(&[("x-api-key", "k1")])).as_deref(), Some("k1"));
        assert_eq!(
            api_key(&headers(&[("authorization", "Bearer k2")])).as_deref(),
            Some("k2")
        );
        assert_eq!(
            api_key(&headers(&[("x-api-key", "k1"), ("authorization", "Bearer k2")])).as_deref(),
            Some("k1")
        );
        assert_eq!(api_key(&headers(&[("authorization", "Basic abc")])), None);
        assert_eq!(api_key(&headers(&[("x-api-key", "  ")])), None);
        assert_eq!(api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn test_make_request_id_is_uuid() {
        let request = Request::new(());
        let id = MakeRequestUuidV4.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }
}
