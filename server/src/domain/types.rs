//! Common domain types

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Outcome of a one-shot process execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "durationMs", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

fn serialize_duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Machine code, human message and optional remediation hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub remediation_hint: Option<String>,
}

/// Status tick emitted while an adapter call is running
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub step: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            percent: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent.min(100));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Callback receiving progress ticks from a long-running adapter call
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress callback that discards every event
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Batch operation status, serialized as its numeric discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending = 0,
    Succeeded = 1,
    Failed = 2,
}

impl Serialize for OperationStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(*self as u8)
    }
}

/// Response envelope for batch operations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub operation_id: String,
    pub tool: String,
    pub action: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OperationResponse {
    /// Operation that has been accepted but not finished
    pub fn pending(operation_id: &str, tool: &str, action: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            tool: tool.to_string(),
            action: action.to_string(),
            status: OperationStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn succeed(mut self, result: serde_json::Value) -> Self {
        self.status = OperationStatus::Succeeded;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: ErrorInfo) -> Self {
        self.status = OperationStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        self
    }
}
