//! Tool invocation descriptions
//!
//! A command is built once by the caller, then handed to a command builder
//! that renders it into an argument list. Nothing here touches the OS.

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Generate a fresh operation id used for log correlation and responses
pub fn generate_operation_id() -> String {
    format!("op_{}", Uuid::new_v4().simple())
}

/// External tools wrapped by this backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// PAK/IoStore container converter
    Converter,
    /// Asset serializer
    Serializer,
    /// UWP package dumper
    Dumper,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Converter, ToolKind::Serializer, ToolKind::Dumper];

    /// Route segment and config key for the tool
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Converter => "retoc",
            ToolKind::Serializer => "uasset",
            ToolKind::Dumper => "uwp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "retoc" => Some(ToolKind::Converter),
            "uasset" => Some(ToolKind::Serializer),
            "uwp" => Some(ToolKind::Dumper),
            _ => None,
        }
    }
}

/// Unreal engine versions understood by the wrapped tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineVersion {
    Ue4_25,
    Ue4_26,
    Ue4_27,
    Ue5_0,
    Ue5_1,
    Ue5_2,
    Ue5_3,
    Ue5_4,
    Ue5_5,
}

impl EngineVersion {
    /// Parse a caller-supplied version, accepting `UE5_4`, `5.4` and `VER_UE5_4`
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().trim_start_matches("VER_").to_ascii_uppercase();
        let version = match normalized.as_str() {
            "UE4_25" | "4.25" => EngineVersion::Ue4_25,
            "UE4_26" | "4.26" => EngineVersion::Ue4_26,
            "UE4_27" | "4.27" => EngineVersion::Ue4_27,
            "UE5_0" | "5.0" => EngineVersion::Ue5_0,
            "UE5_1" | "5.1" => EngineVersion::Ue5_1,
            "UE5_2" | "5.2" => EngineVersion::Ue5_2,
            "UE5_3" | "5.3" => EngineVersion::Ue5_3,
            "UE5_4" | "5.4" => EngineVersion::Ue5_4,
            "UE5_5" | "5.5" => EngineVersion::Ue5_5,
            _ => {
                return Err(Error::invalid_value(
                    "engineVersion",
                    "unsupported engine version",
                    value,
                ))
            }
        };
        Ok(version)
    }

    /// Token passed to the container converter
    pub fn converter_token(&self) -> &'static str {
        match self {
            EngineVersion::Ue4_25 => "UE4_25",
            EngineVersion::Ue4_26 => "UE4_26",
            EngineVersion::Ue4_27 => "UE4_27",
            EngineVersion::Ue5_0 => "UE5_0",
            EngineVersion::Ue5_1 => "UE5_1",
            EngineVersion::Ue5_2 => "UE5_2",
            EngineVersion::Ue5_3 => "UE5_3",
            EngineVersion::Ue5_4 => "UE5_4",
            EngineVersion::Ue5_5 => "UE5_5",
        }
    }

    /// Token passed to the asset serializer
    pub fn serializer_token(&self) -> String {
        format!("VER_{}", self.converter_token())
    }
}

/// Container converter sub-commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetocCommandType {
    ToLegacy,
    ToZen,
    Info,
    List,
    Unpack,
    Verify,
}

impl RetocCommandType {
    /// Parse a command type, accepting the enum name or its route form
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ToLegacy" | "to-legacy" => Ok(RetocCommandType::ToLegacy),
            "ToZen" | "to-zen" => Ok(RetocCommandType::ToZen),
            "Info" | "info" => Ok(RetocCommandType::Info),
            "List" | "list" => Ok(RetocCommandType::List),
            "Unpack" | "unpack" => Ok(RetocCommandType::Unpack),
            "Verify" | "verify" => Ok(RetocCommandType::Verify),
            other => Err(Error::invalid_value(
                "commandType",
                "unknown command type",
                other,
            )),
        }
    }

    /// Fixed sub-command token understood by the converter
    pub fn token(&self) -> &'static str {
        match self {
            RetocCommandType::ToLegacy => "to-legacy",
            RetocCommandType::ToZen => "to-zen",
            RetocCommandType::Info => "info",
            RetocCommandType::List => "list",
            RetocCommandType::Unpack => "unpack",
            RetocCommandType::Verify => "verify",
        }
    }

    /// Whether the command writes to an output location
    pub fn produces_output(&self) -> bool {
        matches!(
            self,
            RetocCommandType::ToLegacy | RetocCommandType::ToZen | RetocCommandType::Unpack
        )
    }
}

/// One container converter invocation
#[derive(Debug, Clone)]
pub struct RetocCommand {
    pub operation_id: String,
    pub command_type: RetocCommandType,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub engine_version: Option<String>,
    pub aes_key: Option<String>,
    pub include_filters: Vec<String>,
    pub exclude_filters: Vec<String>,
    pub additional_args: Vec<String>,
    pub verbose: bool,
    pub working_directory: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
}

impl RetocCommand {
    pub fn new(command_type: RetocCommandType) -> Self {
        Self {
            operation_id: generate_operation_id(),
            command_type,
            input_path: None,
            output_path: None,
            engine_version: None,
            aes_key: None,
            include_filters: Vec::new(),
            exclude_filters: Vec::new(),
            additional_args: Vec::new(),
            verbose: false,
            working_directory: None,
            timeout_seconds: None,
        }
    }
}

/// Asset serializer directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UAssetMode {
    ToJson,
    FromJson,
}

impl UAssetMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "ToJson" | "to-json" => Ok(UAssetMode::ToJson),
            "FromJson" | "from-json" => Ok(UAssetMode::FromJson),
            other => Err(Error::invalid_value("mode", "unknown serializer mode", other)),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            UAssetMode::ToJson => "tojson",
            UAssetMode::FromJson => "fromjson",
        }
    }
}

/// One asset serializer invocation
#[derive(Debug, Clone)]
pub struct UAssetCommand {
    pub operation_id: String,
    pub mode: UAssetMode,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub engine_version: Option<String>,
    pub mappings_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
}

impl UAssetCommand {
    pub fn new(mode: UAssetMode) -> Self {
        Self {
            operation_id: generate_operation_id(),
            mode,
            input_path: None,
            output_path: None,
            engine_version: None,
            mappings_path: None,
            working_directory: None,
            timeout_seconds: None,
        }
    }
}

/// One UWP package dump invocation
#[derive(Debug, Clone)]
pub struct UwpDumpCommand {
    pub operation_id: String,
    pub process_id: Option<u32>,
    pub output_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
}

impl UwpDumpCommand {
    pub fn new() -> Self {
        Self {
            operation_id: generate_operation_id(),
            process_id: None,
            output_path: None,
            working_directory: None,
            timeout_seconds: None,
        }
    }
}

impl Default for UwpDumpCommand {
    fn default() -> Self {
        Self::new()
    }
}
