//! Service assembly and config reload.
//!
//! [`Services`] owns everything that outlives a single request: the health
//! checker with its sweep, the request throttler with its janitor, and the
//! live configuration. The HTTP layer gets shared handles via
//! [`Services::app_state`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use arc_swap::ArcSwap;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::clock::{self, Clock};
use crate::config::ServiceConfig;
use crate::health::{HealthChecker, HealthError};
use crate::http::server::AppState;
use crate::lifecycle::Shutdown;
use crate::security::RequestThrottler;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Health(#[from] HealthError),
}

/// What a config reload changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
    pub throttler_replaced: bool,
}

pub struct Services {
    config: Arc<ArcSwap<ServiceConfig>>,
    health: Arc<HealthChecker>,
    throttler: Arc<ArcSwap<RequestThrottler>>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    janitor: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
}

impl Services {
    pub fn new(config: ServiceConfig) -> Result<Self, StartupError> {
        Self::with_clock(config, clock::system())
    }

    /// Build all long-lived components and register the configured providers.
    /// Nothing is spawned until [`Services::start`].
    pub fn with_clock(config: ServiceConfig, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        let health = HealthChecker::with_clock(
            config.health_check.clone(),
            config.breaker.clone(),
            clock.clone(),
        )?;
        for provider in &config.providers {
            health.add_provider(&provider.id, &provider.endpoint);
        }

        let throttler = RequestThrottler::from_config(&config.rate_limit, clock.clone());

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            health: Arc::new(health),
            throttler: Arc::new(ArcSwap::from_pointee(throttler)),
            clock,
            shutdown: Shutdown::new(),
            janitor: Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn throttler(&self) -> Arc<RequestThrottler> {
        self.throttler.load_full()
    }

    pub fn config(&self) -> Arc<ServiceConfig> {
        self.config.load_full()
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            health: self.health.clone(),
            throttler: self.throttler.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
        }
    }

    /// Start the health sweep and the limiter janitor.
    pub fn start(&self) {
        self.health.start();

        let mut janitor = self.janitor.lock().unwrap_or_else(PoisonError::into_inner);
        if janitor.is_none() {
            let interval = Duration::from_secs(self.config.load().rate_limit.cleanup_interval_secs.max(1));
            *janitor = Some(tokio::spawn(run_janitor(
                self.throttler.clone(),
                interval,
                self.shutdown.subscribe(),
            )));
        }
    }

    /// Apply a validated configuration.
    ///
    /// Providers are reconciled in place so surviving providers keep their
    /// breaker state. The throttler is replaced only when a budget changed,
    /// which resets all counters. Breaker, health check and listener changes
    /// take effect on restart.
    pub fn apply_reload(&self, new_config: ServiceConfig) -> ReloadSummary {
        let current = self.config.load_full();
        let mut summary = ReloadSummary::default();

        let wanted: HashSet<&str> = new_config.providers.iter().map(|p| p.id.as_str()).collect();
        for id in self.health.provider_ids() {
            if !wanted.contains(id.as_str()) && self.health.remove_provider(&id) {
                summary.removed.push(id);
            }
        }
        for provider in &new_config.providers {
            match self.health.provider_status(&provider.id) {
                None => summary.added.push(provider.id.clone()),
                Some(existing) if existing.endpoint != provider.endpoint => {
                    summary.updated.push(provider.id.clone())
                }
                Some(_) => {}
            }
            self.health.add_provider(&provider.id, &provider.endpoint);
        }

        let old_limits = &current.rate_limit;
        let new_limits = &new_config.rate_limit;
        if old_limits.global != new_limits.global
            || old_limits.ip != new_limits.ip
            || old_limits.api_key != new_limits.api_key
        {
            self.throttler
                .store(Arc::new(RequestThrottler::from_config(new_limits, self.clock.clone())));
            summary.throttler_replaced = true;
        }

        if current.breaker != new_config.breaker
            || current.health_check != new_config.health_check
            || current.listener != new_config.listener
        {
            tracing::warn!("Breaker, health check or listener settings changed; restart to apply");
        }

        self.config.store(Arc::new(new_config));

        tracing::info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            throttler_replaced = summary.throttler_replaced,
            "Configuration reloaded"
        );
        summary
    }

    /// Stop background work: health sweep first, then the janitor.
    pub async fn shutdown(&self) {
        self.health.stop().await;

        self.shutdown.trigger();
        let janitor = self.janitor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = janitor {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Limiter janitor ended abnormally");
            }
        }
        tracing::info!("Background services stopped");
    }
}

async fn run_janitor(
    throttler: Arc<ArcSwap<RequestThrottler>>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; nothing to purge yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let purged = throttler.load().purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired rate limit windows");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitConfig, ProviderConfig};

    fn config(providers: &[(&str, &str)]) -> ServiceConfig {
        ServiceConfig {
            providers: providers
                .iter()
                .map(|(id, endpoint)| ProviderConfig {
                    id: id.to_string(),
                    endpoint: endpoint.to_string(),
                })
                .collect(),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_registers_configured_providers() {
        let services = Services::new(config(&[("a", "http://a.local"), ("b", "http://b.local")])).unwrap();
        assert_eq!(services.health().provider_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_reload_reconciles_providers() {
        let services = Services::new(config(&[("a", "http://a.local"), ("b", "http://b.local")])).unwrap();
        let kept = services.health().get_circuit_breaker("a").unwrap();

        let summary = services.apply_reload(config(&[("a", "http://a2.local"), ("c", "http://c.local")]));

        assert_eq!(summary.added, vec!["c"]);
        assert_eq!(summary.removed, vec!["b"]);
        assert_eq!(summary.updated, vec!["a"]);
        assert!(!summary.throttler_replaced);
        assert!(Arc::ptr_eq(&kept, &services.health().get_circuit_breaker("a").unwrap()));
        assert_eq!(services.health().provider_ids(), vec!["a", "c"]);
    }

    #[test]
    fn test_reload_swaps_throttler_on_limit_change() {
        let services = Services::new(ServiceConfig::default()).unwrap();
        let before = services.throttler();

        let mut new_config = ServiceConfig::default();
        new_config.rate_limit.ip = LimitConfig::per_minute(5);
        let summary = services.apply_reload(new_config);

        assert!(summary.throttler_replaced);
        assert!(!Arc::ptr_eq(&before, &services.throttler()));
        assert_eq!(services.config().rate_limit.ip.limit, 5);

        let summary = services.apply_reload((*services.config()).clone());
        assert!(!summary.throttler_replaced);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let services = Services::new(ServiceConfig::default()).unwrap();
        services.start();
        assert!(services.health().is_running());

        services.shutdown().await;
        assert!(!services.health().is_running());
    }
}
