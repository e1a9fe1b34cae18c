//! Health handler

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use verification_engine::SweepReport;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub scheduler_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepReport>,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        scheduler_running: state.scheduler.is_running().await,
        last_sweep: state.scheduler.last_report().await,
    })
}
