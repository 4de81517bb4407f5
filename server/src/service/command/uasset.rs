//! Asset serializer arguments

use std::path::Path;

use super::{check_absolute, check_executable, require_absolute, BuiltCommand, CommandArg};
use crate::config::Config;
use crate::domain::command::{EngineVersion, UAssetCommand};
use crate::error::{Error, Result};

/// Render `<mode> <input> <output> <VER_...> [mappings]`
pub fn build_uasset(command: &UAssetCommand, _config: &Config, executable: &Path) -> Result<BuiltCommand> {
    check_executable(executable)?;

    let input = require_absolute("inputPath", command.input_path.as_ref())?;
    let output = require_absolute("outputPath", command.output_path.as_ref())?;
    let engine = command
        .engine_version
        .as_deref()
        .ok_or_else(|| Error::validation("engineVersion", "is required"))
        .and_then(EngineVersion::parse)?;
    if let Some(mappings) = &command.mappings_path {
        check_absolute("mappingsPath", mappings)?;
    }

    let mut built = BuiltCommand::new(executable);
    built
        .push(CommandArg::token(command.mode.token()))
        .push(CommandArg::path(input))
        .push(CommandArg::path(output))
        .push(CommandArg::token(engine.serializer_token()));
    if let Some(mappings) = &command.mappings_path {
        built.push(CommandArg::path(mappings));
    }

    Ok(built)
}
