//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a provider:
//!     → health::HealthChecker::get_circuit_breaker(provider)
//!     → circuit_breaker.rs (admit or fail fast)
//!     → wrapped operation runs, outcome recorded
//!
//! Background sweep:
//!     → probe result recorded on the same breaker (record_result)
//! ```

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerStats, CallError, CircuitBreaker, CircuitOpenError, CircuitState};
