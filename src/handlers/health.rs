// Health surface handlers
// Degraded readiness still answers 200 (the body carries the detail);
// unhealthy answers 503.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;

use crate::services::health_service::{ProbeStatus, ReadinessReport};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/health/ready/storage", get(storage_readiness))
        .route("/health/ready/instances", get(instance_readiness))
        .with_state(state)
}

fn report_response(report: ReadinessReport) -> impl IntoResponse {
    let code = match report.status {
        ProbeStatus::Healthy | ProbeStatus::Degraded => StatusCode::OK,
        ProbeStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state.health_service.liveness();
    (StatusCode::OK, "OK")
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    report_response(state.health_service.readiness().await)
}

async fn storage_readiness(State(state): State<AppState>) -> impl IntoResponse {
    report_response(state.health_service.storage_readiness().await)
}

async fn instance_readiness(State(state): State<AppState>) -> impl IntoResponse {
    report_response(state.health_service.instance_readiness().await)
}
