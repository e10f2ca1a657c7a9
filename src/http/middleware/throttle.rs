//! Admission control middleware.
//!
//! Runs every throttled request through the live [`RequestThrottler`]:
//! admitted responses carry the rate-limit headers, denied requests get a
//! 429 with the denying scope's reason and a `Retry-After`.
//!
//! [`RequestThrottler`]: crate::security::RequestThrottler

use std::net::SocketAddr;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::{api_key, client_ip, request_id};
use crate::http::response::{apply_headers, ApiError};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::throttle::secs_until;

pub async fn throttle_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let enabled = state.config.load().rate_limit.enabled;
    if !enabled {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let key = api_key(request.headers());

    let throttler = state.throttler.load_full();
    match throttler.check_request(&ip, key.as_deref()) {
        Ok(()) => {
            metrics::record_admitted();
            let headers = throttler.rate_limit_headers(&ip, key.as_deref());
            let mut response = next.run(request).await;
            apply_headers(&mut response, &headers);
            response
        }
        Err(denied) => {
            tracing::warn!(
                request_id = %request_id(request.headers()),
                client = %ip,
                scope = denied.scope.label(),
                "Rate limit exceeded"
            );
            metrics::record_throttled(denied.scope.metric_label());

            let now = throttler.limiter(denied.scope).now();
            let retry_after = secs_until(denied.reset_at, now).max(1);

            let mut response = ApiError::new(StatusCode::TOO_MANY_REQUESTS, denied.reason()).into_response();
            apply_headers(&mut response, &throttler.rate_limit_headers(&ip, key.as_deref()));
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}
