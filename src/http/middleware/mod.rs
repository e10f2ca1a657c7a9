//! Request middleware.

pub mod throttle;

pub use throttle::throttle_middleware;
