//! Container converter adapter

use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::{AdapterContext, ToolAdapter};
use crate::domain::command::{RetocCommand, RetocCommandType, ToolKind};
use crate::domain::types::ProcessResult;
use crate::error::{Error, Result};
use crate::service::command::{build_retoc, BuiltCommand};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetocResult {
    pub operation_id: String,
    pub command_type: RetocCommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout: String,
}

pub struct RetocAdapter {
    ctx: AdapterContext,
}

impl RetocAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }
}

impl ToolAdapter for RetocAdapter {
    type Command = RetocCommand;
    type Output = RetocResult;

    fn tool(&self) -> ToolKind {
        ToolKind::Converter
    }

    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn build_command(&self, command: &RetocCommand, executable: &Path) -> Result<BuiltCommand> {
        build_retoc(command, &self.ctx.config, executable)
    }

    fn map_result(&self, command: &RetocCommand, result: ProcessResult) -> Result<RetocResult> {
        if !result.success() {
            return Err(self.ctx.tool_failure(&result));
        }

        let output_path = if command.command_type.produces_output() {
            command.output_path.as_ref()
        } else {
            None
        };
        if let Some(path) = output_path {
            if !path.exists() {
                warn!(
                    "[{}] converter exited cleanly but produced no output at {}",
                    command.operation_id,
                    path.display()
                );
                return Err(Error::ToolExecution {
                    exit_code: result.exit_code,
                    stdout: format!("expected output was not created: {}", path.display()),
                    stderr: String::new(),
                });
            }
        }

        Ok(RetocResult {
            operation_id: command.operation_id.clone(),
            command_type: command.command_type,
            output_path: output_path.map(|p| p.display().to_string()),
            exit_code: result.exit_code,
            duration_ms: result.duration.as_millis() as u64,
            stdout: result.stdout,
        })
    }
}
