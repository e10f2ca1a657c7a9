use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use crate::health::ProviderStatus;
use crate::http::response::ApiError;
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub providers_registered: usize,
    pub providers_healthy: usize,
    pub health_checks_running: bool,
    pub rate_limiting_enabled: bool,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let config = state.config.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        providers_registered: state.health.len(),
        providers_healthy: state.health.get_healthy_providers().len(),
        health_checks_running: state.health.is_running(),
        rate_limiting_enabled: config.rate_limit.enabled,
    })
}

pub async fn get_providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    Json(state.health.all_provider_status())
}

/// Force a provider's breaker back to Closed.
pub async fn reset_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProviderStatus>, ApiError> {
    let breaker = state
        .health
        .get_circuit_breaker(&id)
        .ok_or_else(|| ApiError::not_found(format!("unknown provider '{id}'")))?;

    breaker.reset();
    tracing::info!(provider = %id, "Breaker reset via admin API");

    state
        .health
        .provider_status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown provider '{id}'")))
}
