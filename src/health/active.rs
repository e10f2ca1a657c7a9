//! Active health probing.
//!
//! # Responsibilities
//! - Build the probe URL for a provider endpoint
//! - Issue one bounded HTTP GET and classify the result
//!
//! Any failure here is a [`ProbeError`]. Callers record it on the provider's
//! breaker and move on; a probe error never aborts a sweep.

use std::time::Duration;
use tokio::time;
use url::Url;

use crate::config::HealthCheckConfig;

/// Error building the probe HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("failed to build health probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a provider failed its health probe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Transport(String),
    #[error("non-success status {0}")]
    Status(u16),
}

/// Issues health probes against provider endpoints.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    path: String,
    timeout: Duration,
}

impl Prober {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .user_agent(concat!("provider-sentinel-health-check/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            path: config.path.clone(),
            timeout: config.timeout(),
        })
    }

    /// Probe URL for `endpoint`: the endpoint base with the health path appended.
    pub fn probe_url(&self, endpoint: &str) -> Result<Url, ProbeError> {
        let invalid = |reason: String| ProbeError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let base = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
        }

        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), self.path);
        Url::parse(&joined).map_err(|e| invalid(e.to_string()))
    }

    /// Probe once. `Ok(())` means the endpoint answered with a 2xx status.
    pub async fn check(&self, endpoint: &str) -> Result<(), ProbeError> {
        let url = self.probe_url(endpoint)?;

        let response = match time::timeout(self.timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(ProbeError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(ProbeError::Transport(e.to_string())),
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}
