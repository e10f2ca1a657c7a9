//! Provider registry and background health sweep.
//!
//! # Responsibilities
//! - Own exactly one circuit breaker per registered provider
//! - Answer "which providers are usable right now"
//! - Periodically probe every provider and feed the result to its breaker
//!
//! The registry map sits behind a reader/writer lock. Probes run with no
//! lock held; only the resulting boolean goes back through the breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::clock::{self, Clock};
use crate::config::{BreakerConfig, HealthCheckConfig};
use crate::health::active::{HealthError, Prober};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{BreakerStats, CircuitBreaker};

#[derive(Debug, Clone)]
struct ProviderEntry {
    endpoint: String,
    breaker: Arc<CircuitBreaker>,
}

/// A provider's endpoint together with its breaker view.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub endpoint: String,
    #[serde(flatten)]
    pub breaker: BreakerStats,
}

/// Result of one sweep over all providers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

struct Registry {
    providers: RwLock<HashMap<String, ProviderEntry>>,
    breaker_config: BreakerConfig,
    health_config: HealthCheckConfig,
    prober: Prober,
    clock: Arc<dyn Clock>,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderEntry>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProviderEntry>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_provider_health(&self, provider_id: &str, healthy: bool) -> bool {
        let breaker = match self.read().get(provider_id) {
            Some(entry) => entry.breaker.clone(),
            None => return false,
        };
        breaker.record_result(healthy);
        true
    }

    async fn perform_health_checks(&self) -> SweepSummary {
        let targets: Vec<(String, String)> = self
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.endpoint.clone()))
            .collect();

        let probes = targets.iter().map(|(id, endpoint)| async move {
            let started = Instant::now();
            let result = self.prober.check(endpoint).await;
            (id.as_str(), result, started.elapsed())
        });
        let results = join_all(probes).await;

        let mut summary = SweepSummary::default();
        for (provider_id, result, elapsed) in results {
            let healthy = result.is_ok();
            if let Err(e) = &result {
                tracing::warn!(provider = %provider_id, error = %e, "Health check failed");
            } else {
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(provider = %provider_id, elapsed_ms, "Health check passed");
            }
            metrics::record_probe(provider_id, healthy, elapsed);

            if !self.update_provider_health(provider_id, healthy) {
                tracing::debug!(provider = %provider_id, "Provider removed during sweep, result dropped");
                continue;
            }

            summary.checked += 1;
            if healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
        }
        summary
    }
}

struct SweepTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// Registry of per-provider circuit breakers plus the background sweep.
pub struct HealthChecker {
    registry: Arc<Registry>,
    sweep: Mutex<Option<SweepTask>>,
}

impl HealthChecker {
    pub fn new(health_config: HealthCheckConfig, breaker_config: BreakerConfig) -> Result<Self, HealthError> {
        Self::with_clock(health_config, breaker_config, clock::system())
    }

    /// Breakers created by this checker read time from `clock`.
    pub fn with_clock(
        health_config: HealthCheckConfig,
        breaker_config: BreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HealthError> {
        let prober = Prober::new(&health_config)?;
        Ok(Self {
            registry: Arc::new(Registry {
                providers: RwLock::new(HashMap::new()),
                breaker_config,
                health_config,
                prober,
                clock,
            }),
            sweep: Mutex::new(None),
        })
    }

    /// Register a provider. An existing breaker is kept; only the endpoint is refreshed.
    pub fn add_provider(&self, provider_id: &str, endpoint: &str) {
        let mut providers = self.registry.write();
        match providers.get_mut(provider_id) {
            Some(entry) => {
                if entry.endpoint != endpoint {
                    tracing::info!(provider = %provider_id, endpoint = %endpoint, "Provider endpoint updated");
                    entry.endpoint = endpoint.to_string();
                }
            }
            None => {
                let breaker = CircuitBreaker::with_clock(
                    format!("provider-{provider_id}"),
                    &self.registry.breaker_config,
                    self.registry.clock.clone(),
                );
                providers.insert(
                    provider_id.to_string(),
                    ProviderEntry {
                        endpoint: endpoint.to_string(),
                        breaker: Arc::new(breaker),
                    },
                );
                tracing::info!(provider = %provider_id, endpoint = %endpoint, "Provider registered");
            }
        }
        metrics::record_providers_registered(providers.len());
    }

    /// Unregister a provider. Returns false if it was not registered.
    pub fn remove_provider(&self, provider_id: &str) -> bool {
        let mut providers = self.registry.write();
        let removed = providers.remove(provider_id).is_some();
        if removed {
            tracing::info!(provider = %provider_id, "Provider removed");
        }
        metrics::record_providers_registered(providers.len());
        removed
    }

    pub fn get_circuit_breaker(&self, provider_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.registry
            .read()
            .get(provider_id)
            .map(|entry| entry.breaker.clone())
    }

    /// Ids of providers whose breaker would currently admit a call, sorted.
    pub fn get_healthy_providers(&self) -> Vec<String> {
        let mut healthy: Vec<String> = self
            .registry
            .read()
            .iter()
            .filter(|(_, entry)| entry.breaker.is_available())
            .map(|(id, _)| id.clone())
            .collect();
        healthy.sort();
        healthy
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registry.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn provider_status(&self, provider_id: &str) -> Option<ProviderStatus> {
        self.registry.read().get(provider_id).map(|entry| ProviderStatus {
            id: provider_id.to_string(),
            endpoint: entry.endpoint.clone(),
            breaker: entry.breaker.stats(),
        })
    }

    pub fn all_provider_status(&self) -> Vec<ProviderStatus> {
        let mut statuses: Vec<ProviderStatus> = self
            .registry
            .read()
            .iter()
            .map(|(id, entry)| ProviderStatus {
                id: id.clone(),
                endpoint: entry.endpoint.clone(),
                breaker: entry.breaker.stats(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a health observation on a provider's breaker without going
    /// through `call`. Returns false if the provider is not registered.
    pub fn update_provider_health(&self, provider_id: &str, healthy: bool) -> bool {
        self.registry.update_provider_health(provider_id, healthy)
    }

    /// Probe every registered provider once, concurrently.
    pub async fn perform_health_checks(&self) -> SweepSummary {
        self.registry.perform_health_checks().await
    }

    /// Spawn the background sweep. Does nothing if it is already running or
    /// disabled in config. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.registry.health_config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let mut sweep = self.sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if sweep.is_some() {
            tracing::debug!("Health checker already running");
            return;
        }

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(run_sweep_loop(self.registry.clone(), shutdown.subscribe()));
        *sweep = Some(SweepTask { shutdown, handle });

        tracing::info!(
            interval_secs = self.registry.health_config.interval_secs,
            path = %self.registry.health_config.path,
            "Health checker started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.sweep
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the background sweep and wait for it to exit.
    ///
    /// Waits at most `stop_grace_secs`, then aborts the task. Safe to call
    /// when never started and safe to call repeatedly.
    pub async fn stop(&self) {
        let task = self.sweep.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(SweepTask { shutdown, mut handle }) = task else {
            return;
        };

        shutdown.trigger();
        let grace = self.registry.health_config.stop_grace();
        match time::timeout(grace, &mut handle).await {
            Ok(_) => tracing::info!("Health checker stopped"),
            Err(_) => {
                tracing::warn!(grace_secs = grace.as_secs(), "Health sweep did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        let sweep = self.sweep.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = sweep.take() {
            task.handle.abort();
        }
    }
}

async fn run_sweep_loop(registry: Arc<Registry>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = time::interval(registry.health_config.interval().max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    summary = registry.perform_health_checks() => {
                        tracing::debug!(
                            checked = summary.checked,
                            healthy = summary.healthy,
                            unhealthy = summary.unhealthy,
                            "Health sweep complete"
                        );
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Shutdown during health sweep, abandoning in-flight probes");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("Health sweep loop exited");
}
