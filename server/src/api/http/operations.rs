//! Operation history handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::domain::types::OperationResponse;
use crate::{AppState, Result};

/// Completed operations, newest first
pub async fn list_operations(State(state): State<AppState>) -> Json<Vec<OperationResponse>> {
    Json(state.operations.list().await)
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<OperationResponse>> {
    Ok(Json(state.operations.get(&operation_id).await?))
}

/// Cancel a running batch or streaming operation
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.operations.cancel(&operation_id)?;
    Ok(Json(serde_json::json!({ "operationId": operation_id, "cancelled": true })))
}
