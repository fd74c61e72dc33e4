use axum::{extract::State, Json};
use cortex_core::UserStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database_reachable: bool,
    pub stripe_configured: bool,
    pub webhooks_configured: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // Any lookup round-trips to the database
    let database_reachable = state.store.get_user(0).await.is_ok();

    Json(HealthResponse {
        status: if database_reachable { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database_reachable,
        stripe_configured: state.gateway.is_some(),
        webhooks_configured: state.reconciler.is_some(),
    })
}
