//! Error types for the toolhost server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::domain::types::ErrorInfo;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a one-shot process was forcibly stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    /// The configured timeout elapsed
    Elapsed { seconds: u64 },
    /// The caller's cancellation token fired first
    Cancelled,
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutReason::Elapsed { seconds } => write!(f, "timed out after {}s", seconds),
            TimeoutReason::Cancelled => write!(f, "cancelled before completion"),
        }
    }
}

/// Main error type for the toolhost server
#[derive(Debug, Error)]
pub enum Error {
    // Request validation
    #[error("Invalid value for {field}: {message}")]
    Validation {
        field: String,
        message: String,
        value: Option<String>,
    },

    // Tool dependencies
    #[error("Required tool is not available: {tool} ({reason})")]
    DependencyMissing { tool: String, reason: String },

    #[error("Checksum mismatch for {tool}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        tool: String,
        expected: String,
        actual: String,
    },

    // Process execution
    #[error("Failed to start {executable}: {reason}")]
    ProcessStart { executable: String, reason: String },

    #[error("Process {0}")]
    Timeout(TimeoutReason),

    #[error("Tool exited with code {exit_code}")]
    ToolExecution {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Elevated privileges are required: {0}")]
    ElevationRequired(String),

    #[error("Operation cancelled")]
    Cancelled,

    // PTY sessions
    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Session is in the wrong state: {0}")]
    SessionState(String),

    #[error("Session has been disposed")]
    ObjectDisposed,

    // General errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a field-identified validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    /// Validation failure that echoes the offending value back for diagnostics
    pub fn invalid_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
            value: Some(value.into()),
        }
    }

    /// Get the machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::DependencyMissing { .. } => "DEPENDENCY_MISSING",
            Error::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Error::ProcessStart { .. } => "PROCESS_START_FAILED",
            Error::Timeout(_) => "PROCESS_TIMEOUT",
            Error::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            Error::ElevationRequired(_) => "ELEVATION_REQUIRED",
            Error::Cancelled => "OPERATION_CANCELLED",
            Error::Pty(_) => "PTY_ERROR",
            Error::SessionState(_) => "SESSION_STATE_ERROR",
            Error::ObjectDisposed => "OBJECT_DISPOSED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Human-facing hint describing how to recover, when one exists
    pub fn remediation_hint(&self) -> Option<String> {
        match self {
            Error::Validation { field, .. } => {
                Some(format!("Correct the '{}' field and submit the request again.", field))
            }
            Error::DependencyMissing { tool, .. } => Some(format!(
                "Reinstall the bundled tools or point the {} path setting at a valid executable.",
                tool
            )),
            Error::ChecksumMismatch { .. } => Some(
                "The bundled tool appears corrupted or modified; reinstall the application."
                    .to_string(),
            ),
            Error::ProcessStart { .. } => Some(
                "Check that the tool exists and that the current user may execute it.".to_string(),
            ),
            Error::Timeout(TimeoutReason::Elapsed { .. }) => Some(
                "Increase timeoutSeconds for large inputs, or check whether the tool is hung."
                    .to_string(),
            ),
            Error::ElevationRequired(_) => {
                Some("Restart the application with administrator privileges.".to_string())
            }
            Error::ToolExecution { .. } => {
                Some("Inspect the tool output for details about the failure.".to_string())
            }
            _ => None,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,

            Error::NotFound(_) => StatusCode::NOT_FOUND,

            Error::DependencyMissing { .. } | Error::ChecksumMismatch { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Error::ElevationRequired(_) => StatusCode::FORBIDDEN,

            Error::Timeout(TimeoutReason::Elapsed { .. }) => StatusCode::GATEWAY_TIMEOUT,

            Error::Timeout(TimeoutReason::Cancelled) | Error::Cancelled => StatusCode::CONFLICT,

            Error::ToolExecution { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            Error::SessionState(_) | Error::ObjectDisposed => StatusCode::CONFLICT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert into the wire-level error triple shared by batch and streaming paths
    pub fn to_info(&self) -> ErrorInfo {
        let message = match self {
            Error::Validation {
                value: Some(value), ..
            } => format!("{} (value: {})", self, value),
            Error::ToolExecution { stderr, stdout, .. } => {
                let detail = if stderr.trim().is_empty() { stdout } else { stderr };
                if detail.trim().is_empty() {
                    self.to_string()
                } else {
                    format!("{}: {}", self, detail.trim_end())
                }
            }
            _ => self.to_string(),
        };

        ErrorInfo {
            code: self.code().to_string(),
            message,
            remediation_hint: self.remediation_hint(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.to_info())).into_response()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::validation("body", err.to_string())
    }
}
