//! Provider health subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (checker.rs sweep task)
//!     → Probe each provider endpoint concurrently
//!     → Feed healthy/unhealthy into the provider's circuit breaker
//!
//! Passive health checks (passive.rs):
//!     Request outcome observed by a caller
//!     → report_success / report_failure
//!     → Same breaker, same thresholds
//!
//! Registry (checker.rs):
//!     provider id → (endpoint, CircuitBreaker)
//! ```
//!
//! # Design Decisions
//! - The circuit breaker is the health state machine; there is no second one
//! - Probes never run while the registry lock is held
//! - Health state is per-provider

pub mod active;
pub mod checker;
pub mod passive;

pub use active::{HealthError, ProbeError, Prober};
pub use checker::{HealthChecker, ProviderStatus, SweepSummary};
