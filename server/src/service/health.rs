//! Backend readiness state

use std::sync::RwLock;

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Starting,
    Ready,
    Error,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub dependencies_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Readiness flag owned by whoever runs the startup checks.
///
/// Only `mark_ready` and `mark_error` change it.
#[derive(Debug)]
pub struct HealthState {
    inner: RwLock<HealthSnapshot>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HealthSnapshot {
                status: HealthStatus::Starting,
                dependencies_ready: false,
                message: None,
            }),
        }
    }

    pub fn mark_ready(&self) {
        info!("Backend is ready");
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.status = HealthStatus::Ready;
        state.dependencies_ready = true;
        state.message = None;
    }

    pub fn mark_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("Backend is unhealthy: {}", message);
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.status = HealthStatus::Error;
        state.dependencies_ready = false;
        state.message = Some(message);
    }

    pub fn status(&self) -> HealthStatus {
        self.snapshot().status
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
