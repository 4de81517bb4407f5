//! Container converter arguments

use std::path::Path;

use super::{
    check_executable, require_absolute, validate_aes_key, validate_extra_args, validate_filter,
    BuiltCommand, CommandArg,
};
use crate::config::Config;
use crate::domain::command::{EngineVersion, RetocCommand, RetocCommandType};
use crate::error::{Error, Result};

/// Render `<sub-command> <input> [output] [options...]` for the converter
pub fn build_retoc(command: &RetocCommand, config: &Config, executable: &Path) -> Result<BuiltCommand> {
    check_executable(executable)?;

    let kind = command.command_type;
    let input = require_absolute("inputPath", command.input_path.as_ref())?;
    let output = if kind.produces_output() {
        Some(require_absolute("outputPath", command.output_path.as_ref())?)
    } else {
        None
    };

    let engine = command
        .engine_version
        .as_deref()
        .map(EngineVersion::parse)
        .transpose()?;
    if kind == RetocCommandType::ToZen && engine.is_none() {
        return Err(Error::validation(
            "engineVersion",
            "is required when building IoStore containers",
        ));
    }

    if let Some(key) = &command.aes_key {
        validate_aes_key(key)?;
    }
    for filter in &command.include_filters {
        validate_filter("includeFilters", filter)?;
    }
    for filter in &command.exclude_filters {
        validate_filter("excludeFilters", filter)?;
    }
    validate_extra_args(&command.additional_args, &config.allowed_extra_args)?;

    let mut built = BuiltCommand::new(executable);
    built
        .push(CommandArg::token(kind.token()))
        .push(CommandArg::path(input));
    if let Some(output) = output {
        built.push(CommandArg::path(output));
    }

    if let Some(engine) = engine {
        built
            .push(CommandArg::token("--version"))
            .push(CommandArg::token(engine.converter_token()));
    }
    if kind == RetocCommandType::ToZen {
        built
            .push(CommandArg::token("--compression"))
            .push(CommandArg::value(config.default_compression.as_str()));
    }
    if let Some(key) = &command.aes_key {
        built
            .push(CommandArg::token("--aes-key"))
            .push(CommandArg::secret(key.as_str()));
    }
    for filter in &command.include_filters {
        built
            .push(CommandArg::token("--filter"))
            .push(CommandArg::value(filter.as_str()));
    }
    for filter in &command.exclude_filters {
        built
            .push(CommandArg::token("--exclude"))
            .push(CommandArg::value(filter.as_str()));
    }
    if command.verbose && !command.additional_args.iter().any(|a| a == "--verbose") {
        built.push(CommandArg::token("--verbose"));
    }
    for arg in &command.additional_args {
        built.push(CommandArg::token(arg.as_str()));
    }

    Ok(built)
}
