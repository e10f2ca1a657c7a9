//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.health_check.interval_secs, 30);
        assert_eq!(config.health_check.timeout_secs, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[breaker]
failure_threshold = 3
open_timeout_ms = 1000

[rate_limit.ip]
window_secs = 1
limit = 2

[[providers]]
id = "openai"
endpoint = "https://api.openai.com"

[[providers]]
id = "local"
endpoint = "http://127.0.0.1:11434"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.rate_limit.ip.limit, 2);
        assert_eq!(config.rate_limit.api_key.limit, 120);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].id, "local");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_config("[breaker\nfailure_threshold = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_lists_every_problem() {
        let err = parse_config(
            r#"
[breaker]
failure_threshold = 0

[health_check]
interval_secs = 0
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../../sentinel.example.toml")).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.rate_limit, ServiceConfig::default().rate_limit);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
