//! Admission control.
//!
//! # Data Flow
//! ```text
//! Incoming request (http/middleware/throttle.rs):
//!     → throttle.rs: RequestThrottler::check_request(ip, api_key)
//!         → global limiter (single shared key)
//!         → per-IP limiter
//!         → per-API-key limiter (only when a key is present)
//!     → admit, or 429 with the denying scope
//! ```
//!
//! # Design Decisions
//! - Fixed windows, not token buckets: counters are cheap and easy to reason about
//! - Each scope has its own counter table and its own limit
//! - No state survives a restart

pub mod rate_limit;
pub mod throttle;

pub use rate_limit::{ApiKeyRateLimiter, IpRateLimiter, RateLimiter};
pub use throttle::{LimitScope, RateLimitExceeded, RequestThrottler};
