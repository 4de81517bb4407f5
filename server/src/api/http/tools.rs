//! Batch tool handlers and command previews

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::command::{generate_operation_id, ToolKind};
use crate::domain::requests::{RetocRequest, UAssetRequest, UwpDumpRequest};
use crate::domain::types::{OperationResponse, ProgressCallback};
use crate::error::Error;
use crate::service::adapter::{ToolAdapter, ToolCommand};
use crate::service::command::CommandPreview;
use crate::{AppState, Result};

type OperationReply = (StatusCode, Json<OperationResponse>);

/// `POST /api/retoc/{action}`
pub async fn retoc_run(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: std::result::Result<Json<RetocRequest>, JsonRejection>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected(ToolKind::Converter, &action, body_error(rejection)),
    };
    match req.into_command(Some(&action)) {
        Ok(command) => run_operation(&state, state.retoc.clone(), command, &action).await,
        Err(e) => rejected(ToolKind::Converter, &action, e),
    }
}

/// `POST /api/uasset/{action}`
pub async fn uasset_run(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: std::result::Result<Json<UAssetRequest>, JsonRejection>,
) -> OperationReply {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected(ToolKind::Serializer, &action, body_error(rejection)),
    };
    match req.into_command(Some(&action)) {
        Ok(command) => run_operation(&state, state.uasset.clone(), command, &action).await,
        Err(e) => rejected(ToolKind::Serializer, &action, e),
    }
}

/// `POST /api/uwp/dump`
pub async fn uwp_dump(
    State(state): State<AppState>,
    body: std::result::Result<Json<UwpDumpRequest>, JsonRejection>,
) -> OperationReply {
    let command = match body {
        Ok(Json(req)) => req.into_command(),
        Err(rejection) => return rejected(ToolKind::Dumper, "dump", body_error(rejection)),
    };
    run_operation(&state, state.uwp.clone(), command, "dump").await
}

pub async fn retoc_build_command(
    State(state): State<AppState>,
    body: std::result::Result<Json<RetocRequest>, JsonRejection>,
) -> Result<Json<CommandPreview>> {
    let Json(req) = body.map_err(body_error)?;
    let command = req.into_command(None)?;
    Ok(Json(state.retoc.preview(&command)?.preview()))
}

pub async fn uasset_build_command(
    State(state): State<AppState>,
    body: std::result::Result<Json<UAssetRequest>, JsonRejection>,
) -> Result<Json<CommandPreview>> {
    let Json(req) = body.map_err(body_error)?;
    let command = req.into_command(None)?;
    Ok(Json(state.uasset.preview(&command)?.preview()))
}

pub async fn uwp_build_command(
    State(state): State<AppState>,
    body: std::result::Result<Json<UwpDumpRequest>, JsonRejection>,
) -> Result<Json<CommandPreview>> {
    let Json(req) = body.map_err(body_error)?;
    let command = req.into_command();
    Ok(Json(state.uwp.preview(&command)?.preview()))
}

/// Run `command` on `adapter`, tracking it in the operation registry
async fn run_operation<A>(
    state: &AppState,
    adapter: Arc<A>,
    command: A::Command,
    action: &str,
) -> OperationReply
where
    A: ToolAdapter,
{
    let operation_id = command.operation_id().to_string();
    let tool = adapter.tool();
    let pending = OperationResponse::pending(&operation_id, tool.as_str(), action);
    let running = state.operations.track(&operation_id);

    info!("[{}] {} {} requested", operation_id, tool.as_str(), action);
    let progress: ProgressCallback = {
        let operation_id = operation_id.clone();
        Arc::new(move |event| {
            debug!(
                "[{}] {} ({}%): {}",
                operation_id,
                event.step,
                event.percent.unwrap_or_default(),
                event.message
            )
        })
    };

    let outcome = adapter
        .execute(&command, running.cancel_token(), progress)
        .await
        .and_then(|output| serde_json::to_value(output).map_err(|e| Error::Internal(e.to_string())));

    let (status, response) = match outcome {
        Ok(result) => (StatusCode::OK, pending.succeed(result)),
        Err(e) => {
            warn!("[{}] {} {} failed: {}", operation_id, tool.as_str(), action, e);
            (e.status_code(), pending.fail(e.to_info()))
        }
    };
    state.operations.complete(response.clone()).await;
    (status, Json(response))
}

/// Malformed or mistyped request body
fn body_error(rejection: JsonRejection) -> Error {
    Error::validation("body", rejection.body_text())
}

/// Envelope for a request that never became a command
fn rejected(tool: ToolKind, action: &str, error: Error) -> OperationReply {
    warn!("Rejected {} {} request: {}", tool.as_str(), action, error);
    let response = OperationResponse::pending(&generate_operation_id(), tool.as_str(), action)
        .fail(error.to_info());
    (error.status_code(), Json(response))
}
