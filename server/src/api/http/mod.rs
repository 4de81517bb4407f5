//! HTTP API handlers

mod health;
mod operations;
mod stream;
mod tools;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Container converter
        .route("/retoc/stream", get(stream::retoc_stream))
        .route("/retoc/build-command", post(tools::retoc_build_command))
        .route("/retoc/{action}", post(tools::retoc_run))
        // Asset serializer
        .route("/uasset/build-command", post(tools::uasset_build_command))
        .route("/uasset/{action}", post(tools::uasset_run))
        // UWP dumper
        .route("/uwp/build-command", post(tools::uwp_build_command))
        .route("/uwp/dump", post(tools::uwp_dump))
        // Operation history
        .route("/operations", get(operations::list_operations))
        .route("/operations/{id}", get(operations::get_operation))
        .route("/operations/{id}/cancel", post(operations::cancel_operation));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
