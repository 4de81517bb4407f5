//! Asset serializer adapter

use std::path::Path;

use serde::Serialize;

use super::{AdapterContext, ToolAdapter};
use crate::domain::command::{ToolKind, UAssetCommand, UAssetMode};
use crate::domain::types::ProcessResult;
use crate::error::Result;
use crate::service::command::{build_uasset, BuiltCommand};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UAssetResult {
    pub operation_id: String,
    pub mode: UAssetMode,
    pub output_path: String,
    pub duration_ms: u64,
    pub stdout: String,
}

pub struct UAssetAdapter {
    ctx: AdapterContext,
}

impl UAssetAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }
}

impl ToolAdapter for UAssetAdapter {
    type Command = UAssetCommand;
    type Output = UAssetResult;

    fn tool(&self) -> ToolKind {
        ToolKind::Serializer
    }

    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn build_command(&self, command: &UAssetCommand, executable: &Path) -> Result<BuiltCommand> {
        build_uasset(command, &self.ctx.config, executable)
    }

    fn map_result(&self, command: &UAssetCommand, result: ProcessResult) -> Result<UAssetResult> {
        if !result.success() {
            return Err(self.ctx.tool_failure(&result));
        }
        Ok(UAssetResult {
            operation_id: command.operation_id.clone(),
            mode: command.mode,
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
