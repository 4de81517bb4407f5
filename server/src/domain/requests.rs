//! JSON request bodies and their conversion into tool commands

use std::path::PathBuf;

use serde::Deserialize;

use super::command::{
    generate_operation_id, RetocCommand, RetocCommandType, UAssetCommand, UAssetMode,
    UwpDumpCommand,
};
use crate::error::{Error, Result};

/// Container converter request, shared by batch, preview and streaming routes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetocRequest {
    pub command_type: Option<String>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub engine_version: Option<String>,
    pub aes_key: Option<String>,
    pub include_filters: Vec<String>,
    pub exclude_filters: Vec<String>,
    pub additional_args: Vec<String>,
    pub verbose: bool,
    pub working_directory: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub tty_probe: bool,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl RetocRequest {
    /// Build the command; `action` (from the route) overrides `commandType`
    pub fn into_command(self, action: Option<&str>) -> Result<RetocCommand> {
        let raw_type = action
            .map(str::to_string)
            .or(self.command_type)
            .ok_or_else(|| Error::validation("commandType", "is required"))?;

        Ok(RetocCommand {
            operation_id: generate_operation_id(),
            command_type: RetocCommandType::parse(&raw_type)?,
            input_path: non_empty(self.input_path).map(PathBuf::from),
            output_path: non_empty(self.output_path).map(PathBuf::from),
            engine_version: non_empty(self.engine_version),
            aes_key: non_empty(self.aes_key),
            include_filters: self.include_filters,
            exclude_filters: self.exclude_filters,
            additional_args: self.additional_args,
            verbose: self.verbose,
            working_directory: non_empty(self.working_directory).map(PathBuf::from),
            timeout_seconds: self.timeout_seconds,
        })
    }
}

/// Asset serializer request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UAssetRequest {
    pub mode: Option<String>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub engine_version: Option<String>,
    pub mappings_path: Option<String>,
    pub working_directory: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl UAssetRequest {
    pub fn into_command(self, action: Option<&str>) -> Result<UAssetCommand> {
        let raw_mode = action
            .map(str::to_string)
            .or(self.mode)
            .ok_or_else(|| Error::validation("mode", "is required"))?;

        Ok(UAssetCommand {
            operation_id: generate_operation_id(),
            mode: UAssetMode::parse(&raw_mode)?,
            input_path: non_empty(self.input_path).map(PathBuf::from),
            output_path: non_empty(self.output_path).map(PathBuf::from),
            engine_version: non_empty(self.engine_version),
            mappings_path: non_empty(self.mappings_path).map(PathBuf::from),
            working_directory: non_empty(self.working_directory).map(PathBuf::from),
            timeout_seconds: self.timeout_seconds,
        })
    }
}

/// UWP dumper request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UwpDumpRequest {
    pub process_id: Option<u32>,
    pub output_path: Option<String>,
    pub working_directory: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl UwpDumpRequest {
    pub fn into_command(self) -> UwpDumpCommand {
        UwpDumpCommand {
            operation_id: generate_operation_id(),
            process_id: self.process_id,
            output_path: non_empty(self.output_path).map(PathBuf::from),
            working_directory: non_empty(self.working_directory).map(PathBuf::from),
            timeout_seconds: self.timeout_seconds,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
