//! Composite admission check.
//!
//! Order: global → per-IP → per-API-key. The first limiter that denies wins
//! and names itself in the reason. Later limiters are not consulted, so a
//! denied request consumes no budget downstream of the denying scope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::security::rate_limit::{ApiKeyRateLimiter, IpRateLimiter, RateLimiter};

const GLOBAL_KEY: &str = "global";

/// Which budget a decision or header belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Global,
    Ip,
    ApiKey,
}

impl LimitScope {
    /// Label used in reasons and header names.
    pub fn label(self) -> &'static str {
        match self {
            LimitScope::Global => "Global",
            LimitScope::Ip => "IP",
            LimitScope::ApiKey => "APIKey",
        }
    }

    /// Label used in metrics.
    pub fn metric_label(self) -> &'static str {
        match self {
            LimitScope::Global => "global",
            LimitScope::Ip => "ip",
            LimitScope::ApiKey => "api_key",
        }
    }
}

/// A request was refused by one of the throttler's budgets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} rate limit exceeded", .scope.label())]
pub struct RateLimitExceeded {
    pub scope: LimitScope,
    pub reset_at: Instant,
}

impl RateLimitExceeded {
    /// Human-readable reason, e.g. "IP rate limit exceeded".
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Time until the denying budget's window ends.
    pub fn retry_after(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}

/// Seconds until `reset_at`, rounded up.
pub(crate) fn secs_until(reset_at: Instant, now: Instant) -> u64 {
    let left = reset_at.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}

/// Global, per-IP and per-API-key limiters behind one admit/deny decision.
#[derive(Debug)]
pub struct RequestThrottler {
    global: RateLimiter,
    ip: IpRateLimiter,
    api_key: ApiKeyRateLimiter,
}

impl RequestThrottler {
    pub fn new(global: RateLimiter, ip: IpRateLimiter, api_key: ApiKeyRateLimiter) -> Self {
        Self { global, ip, api_key }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            RateLimiter::from_config(&config.global, clock.clone()),
            IpRateLimiter::new(RateLimiter::from_config(&config.ip, clock.clone())),
            ApiKeyRateLimiter::new(RateLimiter::from_config(&config.api_key, clock)),
        )
    }

    /// Admit or deny one request. An empty API key counts as no key.
    pub fn check_request(&self, ip: &str, api_key: Option<&str>) -> Result<(), RateLimitExceeded> {
        if !self.global.allow(GLOBAL_KEY) {
            return Err(self.denied(LimitScope::Global, ip, api_key));
        }
        if !self.ip.allow_ip(ip) {
            return Err(self.denied(LimitScope::Ip, ip, api_key));
        }
        if let Some(key) = non_empty(api_key) {
            if !self.api_key.allow_api_key(key) {
                return Err(self.denied(LimitScope::ApiKey, ip, api_key));
            }
        }
        Ok(())
    }

    fn denied(&self, scope: LimitScope, ip: &str, api_key: Option<&str>) -> RateLimitExceeded {
        let (limiter, id) = match scope {
            LimitScope::Global => (&self.global, GLOBAL_KEY),
            LimitScope::Ip => (self.ip.limiter(), ip),
            LimitScope::ApiKey => (self.api_key.limiter(), api_key.unwrap_or_default()),
        };
        tracing::debug!(scope = scope.label(), ip = %ip, "Request throttled");
        RateLimitExceeded {
            scope,
            reset_at: limiter.reset_at(id),
        }
    }

    /// `X-RateLimit-<Scope>-{Limit,Remaining,Reset}` for every applicable
    /// scope. API-key headers are omitted when no key was supplied.
    pub fn rate_limit_headers(&self, ip: &str, api_key: Option<&str>) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::new();
        insert_scope(&mut headers, LimitScope::Global, &self.global, GLOBAL_KEY);
        insert_scope(&mut headers, LimitScope::Ip, self.ip.limiter(), ip);
        if let Some(key) = non_empty(api_key) {
            insert_scope(&mut headers, LimitScope::ApiKey, self.api_key.limiter(), key);
        }
        headers
    }

    /// Purge elapsed windows from all three limiters.
    pub fn purge_expired(&self) -> usize {
        self.global.purge_expired()
            + self.ip.limiter().purge_expired()
            + self.api_key.limiter().purge_expired()
    }

    pub fn limiter(&self, scope: LimitScope) -> &RateLimiter {
        match scope {
            LimitScope::Global => &self.global,
            LimitScope::Ip => self.ip.limiter(),
            LimitScope::ApiKey => self.api_key.limiter(),
        }
    }
}

fn non_empty(api_key: Option<&str>) -> Option<&str> {
    api_key.filter(|k| !k.is_empty())
}

fn insert_scope(
    headers: &mut BTreeMap<&'static str, String>,
    scope: LimitScope,
    limiter: &RateLimiter,
    id: &str,
) {
    let (limit, remaining, reset) = match scope {
        LimitScope::Global => (
            "X-RateLimit-Global-Limit",
            "X-RateLimit-Global-Remaining",
            "X-RateLimit-Global-Reset",
        ),
        LimitScope::Ip => (
            "X-RateLimit-IP-Limit",
            "X-RateLimit-IP-Remaining",
            "X-RateLimit-IP-Reset",
        ),
        LimitScope::ApiKey => (
            "X-RateLimit-APIKey-Limit",
            "X-RateLimit-APIKey-Remaining",
            "X-RateLimit-APIKey-Reset",
        ),
    };
    headers.insert(limit, limiter.limit().to_string());
    headers.insert(remaining, limiter.remaining(id).to_string());
    headers.insert(reset, secs_until(limiter.reset_at(id), limiter.now()).to_string());
}
