//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with public, throttled and admin routes
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve on a listener until the shutdown future resolves

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::ServiceConfig;
use crate::health::HealthChecker;
use crate::http::handlers;
use crate::http::middleware::throttle_middleware;
use crate::http::request::{MakeRequestUuidV4, X_REQUEST_ID};
use crate::security::RequestThrottler;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthChecker>,
    pub throttler: Arc<ArcSwap<RequestThrottler>>,
    pub config: Arc<ArcSwap<ServiceConfig>>,
    pub started_at: Instant,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Admin routes are mounted only when enabled at startup.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.load_full();

        let api = Router::new()
            .route("/v1/providers", get(handlers::list_providers))
            .route("/v1/providers/healthy", get(handlers::healthy_providers))
            .route("/v1/providers/{id}", get(handlers::get_provider))
            .route_layer(middleware::from_fn_with_state(state.clone(), throttle_middleware));

        let mut router = Router::new()
            .route("/healthz", get(handlers::healthz))
            .merge(api);
        if config.admin.enabled {
            router = router.merge(admin::setup_admin_router(state.clone()));
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    /// Serve on `listener` until `shutdown` resolves, then drain.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
