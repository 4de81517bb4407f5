//! UWP package dumper adapter

use std::path::Path;

use serde::Serialize;
use tracing::warn;

use super::{looks_like_elevation_failure, AdapterContext, ToolAdapter};
use crate::domain::command::{ToolKind, UwpDumpCommand};
use crate::domain::types::ProcessResult;
use crate::error::{Error, Result};
use crate::infra::output_sink::excerpt;
use crate::service::command::{build_uwp, BuiltCommand};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UwpDumpResult {
    pub operation_id: String,
    pub process_id: u32,
    pub output_path: String,
    pub duration_ms: u64,
    pub stdout: String,
}

pub struct UwpDumpAdapter {
    ctx: AdapterContext,
}

impl UwpDumpAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }
}

impl ToolAdapter for UwpDumpAdapter {
    type Command = UwpDumpCommand;
    type Output = UwpDumpResult;

    fn tool(&self) -> ToolKind {
        ToolKind::Dumper
    }

    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn build_command(&self, command: &UwpDumpCommand, executable: &Path) -> Result<BuiltCommand> {
        build_uwp(command, &self.ctx.config, executable)
    }

    fn map_result(&self, command: &UwpDumpCommand, result: ProcessResult) -> Result<UwpDumpResult> {
        if !result.success() {
            if looks_like_elevation_failure(&result) {
                warn!("[{}] dumper appears to need elevation", command.operation_id);
                let detail = if result.stderr.trim().is_empty() {
                    &result.stdout
                } else {
                    &result.stderr
                };
                return Err(Error::ElevationRequired(
                    excerpt(detail, self.ctx.config.excerpt_limits())
                        .trim_end()
                        .to_string(),
                ));
            }
            return Err(self.ctx.tool_failure(&result));
        }

        Ok(UwpDumpResult {
            operation_id: command.operation_id.clone(),
            process_id: command.process_id.unwrap_or_default(),
            output_path: command
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            duration_ms: result.duration.as_millis() as u64,
            stdout: result.stdout,
        })
    }
}
