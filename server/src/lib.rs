//! Toolhost server library
//!
//! Wraps the converter, serializer and dumper executables behind an HTTP and
//! WebSocket API for a local desktop UI.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod service;

use std::sync::Arc;

use tracing::{info, warn};

pub use crate::config::Config;
pub use crate::error::{Error, Result};

use infra::pty::{PtySessionFactory, TerminalFactory};
use infra::tool_registry::ToolRegistry;
use service::adapter::{AdapterContext, RetocAdapter, UAssetAdapter, UwpDumpAdapter};
use service::health::HealthState;
use service::operations::OperationRegistry;
use service::stream::StreamHandler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub health: Arc<HealthState>,
    pub operations: Arc<OperationRegistry>,
    pub retoc: Arc<RetocAdapter>,
    pub uasset: Arc<UAssetAdapter>,
    pub uwp: Arc<UwpDumpAdapter>,
    pub streams: Arc<StreamHandler>,
}

impl AppState {
    /// State backed by native pseudo-terminals
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_terminals(config, Arc::new(PtySessionFactory))
    }

    pub fn with_terminals(config: Arc<Config>, terminals: Arc<dyn TerminalFactory>) -> Self {
        let registry = Arc::new(ToolRegistry::from_config(&config));
        let operations = Arc::new(OperationRegistry::new(config.history_limit));
        let ctx = AdapterContext::new(config.clone(), registry.clone());

        Self {
            config: config.clone(),
            registry: registry.clone(),
            health: Arc::new(HealthState::new()),
            operations: operations.clone(),
            retoc: Arc::new(RetocAdapter::new(ctx.clone())),
            uasset: Arc::new(UAssetAdapter::new(ctx.clone())),
            uwp: Arc::new(UwpDumpAdapter::new(ctx)),
            streams: Arc::new(StreamHandler::new(config, registry, terminals, operations)),
        }
    }
}

/// Verify every configured tool and publish the outcome on the health state
pub async fn check_dependencies(state: &AppState) {
    let checks = state.registry.verify_all().await;
    if checks.is_empty() {
        warn!("No tool executables are configured");
        state.health.mark_error("no tool executables are configured");
        return;
    }

    let failures: Vec<String> = checks
        .iter()
        .filter(|check| !check.ok)
        .map(|check| {
            format!(
                "{}: {}",
                check.tool.as_str(),
                check.error.as_deref().unwrap_or("verification failed")
            )
        })
        .collect();

    if failures.is_empty() {
        info!("{} tool(s) verified", checks.len());
        state.health.mark_ready();
    } else {
        state.health.mark_error(failures.join("; "));
    }
}
