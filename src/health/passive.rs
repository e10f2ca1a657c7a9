//! Passive health reporting.
//!
//! # Responsibilities
//! - Let callers feed real request outcomes into a provider's breaker
//! - Classify upstream HTTP statuses as failures or successes
//!
//! # Design Decisions
//! - Only 5xx and 429 count as failures
//! - Other 4xx are NOT failures (client error, not provider)

use crate::health::checker::HealthChecker;

/// Whether an upstream status should count against the provider.
pub fn is_failure_status(status: u16) -> bool {
    status >= 500 || status == 429
}

impl HealthChecker {
    /// Record a successful request to `provider_id`. False if not registered.
    pub fn report_success(&self, provider_id: &str) -> bool {
        self.update_provider_health(provider_id, true)
    }

    /// Record a failed request to `provider_id`. False if not registered.
    pub fn report_failure(&self, provider_id: &str) -> bool {
        self.update_provider_health(provider_id, false)
    }

    /// Record an upstream response status for `provider_id`.
    pub fn report_status(&self, provider_id: &str, status: u16) -> bool {
        self.update_provider_health(provider_id, !is_failure_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, HealthCheckConfig};
    use crate::resilience::CircuitState;

    #[test]
    fn test_status_classification() {
        assert!(is_failure_status(500));
        assert!(is_failure_status(503));
        assert!(is_failure_status(429));
        assert!(!is_failure_status(200));
        assert!(!is_failure_status(404));
        assert!(!is_failure_status(401));
    }

    #[test]
    fn test_reports_drive_breaker() {
        let breaker = BreakerConfig {
            failure_threshold: 2,
            open_timeout_ms: 60_000,
        };
        let hc = HealthChecker::new(HealthCheckConfig::default(), breaker).unwrap();
        hc.add_provider("p1", "https://example.com");

        assert!(hc.report_status("p1", 404));
        assert!(hc.report_failure("p1"));
        assert!(hc.report_status("p1", 502));
        assert_eq!(hc.get_circuit_breaker("p1").unwrap().state(), CircuitState::Open);
        assert!(hc.get_healthy_providers().is_empty());

        assert!(!hc.report_success("unknown"));
    }
}
