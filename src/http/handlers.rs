//! Public API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::health::ProviderStatus;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::resilience::CircuitState;

#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    pub id: String,
    pub state: CircuitState,
    pub available: bool,
}

/// Liveness. Never throttled.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderSummary>> {
    let providers = state
        .health
        .all_provider_status()
        .into_iter()
        .map(|status| ProviderSummary {
            id: status.id,
            state: status.breaker.state,
            available: status.breaker.available,
        })
        .collect();
    Json(providers)
}

pub async fn healthy_providers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.health.get_healthy_providers())
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProviderStatus>, ApiError> {
    state
        .health
        .provider_status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown provider '{id}'")))
}
