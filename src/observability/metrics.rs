//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define sentinel metrics (breaker state, probes, admission decisions)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `sentinel_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `sentinel_breaker_transitions_total` (counter): by breaker, from, to
//! - `sentinel_breaker_rejections_total` (counter): calls refused while open
//! - `sentinel_health_probes_total` (counter): by provider, result
//! - `sentinel_health_probe_duration_seconds` (histogram)
//! - `sentinel_requests_admitted_total` / `sentinel_requests_throttled_total` (counters)
//! - `sentinel_providers_registered` (gauge)
//!
//! Without an installed recorder every call here is a no-op, which keeps
//! unit tests free of exporter setup.

use std::net::SocketAddr;
use std::time::Duration;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_breaker_state(breaker: &str, state_code: u8) {
    gauge!("sentinel_breaker_state", "breaker" => breaker.to_string()).set(f64::from(state_code));
}

pub fn record_breaker_transition(breaker: &str, from: &'static str, to: &'static str) {
    counter!(
        "sentinel_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("sentinel_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_probe(provider: &str, healthy: bool, elapsed: Duration) {
    let result = if healthy { "healthy" } else { "unhealthy" };
    counter!(
        "sentinel_health_probes_total",
        "provider" => provider.to_string(),
        "result" => result
    )
    .increment(1);
    histogram!("sentinel_health_probe_duration_seconds", "provider" => provider.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_providers_registered(count: usize) {
    gauge!("sentinel_providers_registered").set(count as f64);
}

pub fn record_admitted() {
    counter!("sentinel_requests_admitted_total").increment(1);
}

pub fn record_throttled(scope: &'static str) {
    counter!("sentinel_requests_throttled_total", "scope" => scope).increment(1);
}
