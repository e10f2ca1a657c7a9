//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, intervals and windows > 0 and bounded)
//! - Check provider ids are unique and endpoints are HTTP(S) URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use url::Url;
use crate::config::schema::{LimitConfig, ServiceConfig};

/// Longest accepted rate-limit window (one year).
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted health-check and cleanup period (one day).
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },
    #[error("providers: empty provider id")]
    EmptyProviderId,
    #[error("providers: duplicate provider id '{0}'")]
    DuplicateProvider(String),
    #[error("providers.{id}: invalid endpoint '{endpoint}' ({reason})")]
    InvalidEndpoint {
        id: String,
        endpoint: String,
        reason: String,
    },
    #[error("health_check.path must start with '/' (got '{0}')")]
    InvalidHealthPath(String),
    #[error("admin.api_key must be set when the admin API is enabled")]
    MissingAdminKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    non_zero(&mut errors, "timeouts.request_secs", config.timeouts.request_secs);
    non_zero(&mut errors, "breaker.failure_threshold", config.breaker.failure_threshold.into());
    non_zero(&mut errors, "breaker.open_timeout_ms", config.breaker.open_timeout_ms);
    check_period(&mut errors, "health_check.interval_secs", config.health_check.interval_secs);
    check_period(&mut errors, "health_check.timeout_secs", config.health_check.timeout_secs);
    at_most(
        &mut errors,
        "health_check.stop_grace_secs",
        config.health_check.stop_grace_secs,
        MAX_INTERVAL_SECS,
    );

    if !config.health_check.path.starts_with('/') {
        errors.push(ValidationError::InvalidHealthPath(config.health_check.path.clone()));
    }

    check_window(&mut errors, "rate_limit.global.window_secs", &config.rate_limit.global);
    check_window(&mut errors, "rate_limit.ip.window_secs", &config.rate_limit.ip);
    check_window(&mut errors, "rate_limit.api_key.window_secs", &config.rate_limit.api_key);
    check_period(
        &mut errors,
        "rate_limit.cleanup_interval_secs",
        config.rate_limit.cleanup_interval_secs,
    );

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if provider.id.trim().is_empty() {
            errors.push(ValidationError::EmptyProviderId);
            continue;
        }
        if !seen.insert(provider.id.as_str()) {
            errors.push(ValidationError::DuplicateProvider(provider.id.clone()));
        }
        if let Err(reason) = check_endpoint(&provider.endpoint) {
            errors.push(ValidationError::InvalidEndpoint {
                id: provider.id.clone(),
                endpoint: provider.endpoint.clone(),
                reason,
            });
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::MissingAdminKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn non_zero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn at_most(errors: &mut Vec<ValidationError>, field: &'static str, value: u64, max: u64) {
    if value > max {
        errors.push(ValidationError::TooLarge { field, max });
    }
}

fn check_period(errors: &mut Vec<ValidationError>, field: &'static str, secs: u64) {
    non_zero(errors, field, secs);
    at_most(errors, field, secs, MAX_INTERVAL_SECS);
}

fn check_window(errors: &mut Vec<ValidationError>, field: &'static str, limit: &LimitConfig) {
    non_zero(errors, field, limit.window_secs);
    at_most(errors, field, limit.window_secs, MAX_WINDOW_SECS);
}

fn check_endpoint(endpoint: &str) -> Result<(), String> {
    let url = Url::parse(endpoint).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProviderConfig;

    fn provider(id: &str, endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn test_duplicate_and_bad_providers() {
        let mut config = ServiceConfig::default();
        config.providers = vec![
            provider("openai", "https://api.openai.com"),
            provider("openai", "https://api.openai.com/v1"),
            provider("", "https://example.com"),
            provider("ftp", "ftp://files.example.com"),
            provider("junk", "not a url"),
        ];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateProvider("openai".into())));
        assert!(errors.contains(&ValidationError::EmptyProviderId));
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ValidationError::InvalidEndpoint { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = ServiceConfig::default();
        config.rate_limit.ip.window_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::Zero {
                field: "rate_limit.ip.window_secs"
            }]
        );
    }

    #[test]
    fn test_oversized_window_and_interval_rejected() {
        let mut config = ServiceConfig::default();
        config.rate_limit.ip.window_secs = u64::MAX;
        config.health_check.interval_secs = u64::MAX;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::TooLarge {
                    field: "health_check.interval_secs",
                    max: MAX_INTERVAL_SECS,
                },
                ValidationError::TooLarge {
                    field: "rate_limit.ip.window_secs",
                    max: MAX_WINDOW_SECS,
                },
            ]
        );

        config.rate_limit.ip.window_secs = MAX_WINDOW_SECS;
        config.health_check.interval_secs = MAX_INTERVAL_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_limit_is_allowed() {
        let mut config = ServiceConfig::default();
        config.rate_limit.api_key.limit = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_admin_key_and_addresses() {
        let mut config = ServiceConfig::default();
        config.admin.enabled = true;
        config.admin.api_key.clear();
        config.listener.bind_address = "localhost".into();
        config.health_check.path = "health".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::MissingAdminKey));
    }
}
