//! Provider health and admission control for LLM provider traffic.

pub mod admin;
pub mod clock;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ServiceConfig;
pub use health::HealthChecker;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
pub use resilience::{CallError, CircuitBreaker, CircuitState};
pub use security::RequestThrottler;
