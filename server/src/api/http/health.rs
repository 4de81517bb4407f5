//! Health endpoint

use axum::{extract::State, Json};

use crate::service::health::HealthSnapshot;
use crate::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}
