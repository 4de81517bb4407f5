//! Argument construction for the wrapped tools
//!
//! Builders are pure: a command, the configuration and a resolved executable
//! go in, an argv comes out. Nothing is ever joined into a shell string; the
//! rendered command line exists only for display and audit.

mod retoc;
mod uasset;
mod uwp;

pub use retoc::build_retoc;
pub use uasset::build_uasset;
pub use uwp::build_uwp;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

/// Placeholder shown wherever a secret argument would appear
pub const REDACTED: &str = "********";

/// Characters with meaning to a shell; rejected in caller-supplied filters
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '<', '>', '\n', '\r', '\0'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// Fixed sub-command, flag or validated enum value
    Token,
    /// Path or filter supplied by the caller; always quoted when displayed
    Value,
    /// Never shown in logs, previews or events
    Secret,
}

/// One argv element plus how it may be displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg {
    pub kind: ArgKind,
    pub value: String,
}

impl CommandArg {
    pub fn token(value: impl Into<String>) -> Self {
        Self {
            kind: ArgKind::Token,
            value: value.into(),
        }
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self {
            kind: ArgKind::Value,
            value: value.into(),
        }
    }

    pub fn path(path: &Path) -> Self {
        Self::value(path.display().to_string())
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            kind: ArgKind::Secret,
            value: value.into(),
        }
    }

    fn display(&self) -> String {
        match self.kind {
            ArgKind::Token => self.value.clone(),
            ArgKind::Value => quote(&self.value),
            ArgKind::Secret => REDACTED.to_string(),
        }
    }
}

/// Executable plus ordered arguments, ready for the process APIs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    pub executable_path: PathBuf,
    pub args: Vec<CommandArg>,
}

impl BuiltCommand {
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            args: Vec::new(),
        }
    }

    pub fn push(&mut self, arg: CommandArg) -> &mut Self {
        self.args.push(arg);
        self
    }

    /// Raw argv, secrets included
    pub fn arguments(&self) -> Vec<String> {
        self.args.iter().map(|a| a.value.clone()).collect()
    }

    /// Argv with secrets masked
    pub fn redacted_arguments(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| match a.kind {
                ArgKind::Secret => REDACTED.to_string(),
                _ => a.value.clone(),
            })
            .collect()
    }

    /// Display form with every path and filter quoted and secrets masked
    pub fn command_line(&self) -> String {
        let mut line = quote(&self.executable_path.display().to_string());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.display());
        }
        line
    }

    pub fn preview(&self) -> CommandPreview {
        CommandPreview {
            executable_path: self.executable_path.display().to_string(),
            arguments: self.redacted_arguments(),
            command_line: self.command_line(),
        }
    }
}

impl fmt::Display for BuiltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Response body of the build-command endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreview {
    pub executable_path: String,
    pub arguments: Vec<String>,
    pub command_line: String,
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

/// Require `path` to be present and absolute
pub(crate) fn require_absolute<'a>(field: &str, path: Option<&'a PathBuf>) -> Result<&'a Path> {
    let path = path.ok_or_else(|| Error::validation(field, "is required"))?;
    check_absolute(field, path)?;
    Ok(path)
}

pub(crate) fn check_absolute(field: &str, path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::invalid_value(
            field,
            "must be an absolute path",
            path.display().to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn check_executable(path: &Path) -> Result<()> {
    check_absolute("executablePath", path)
}

/// Reject filters that could escape the container root or reach a shell
pub(crate) fn validate_filter(field: &str, filter: &str) -> Result<()> {
    if filter.trim().is_empty() {
        return Err(Error::invalid_value(field, "filter is empty", filter));
    }
    if filter.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(Error::invalid_value(
            field,
            "path traversal is not allowed",
            filter,
        ));
    }
    if filter.starts_with('/') || filter.starts_with('\\') || filter.contains(':') {
        return Err(Error::invalid_value(
            field,
            "filters must be relative to the container root",
            filter,
        ));
    }
    if filter.contains(SHELL_METACHARACTERS) {
        return Err(Error::invalid_value(
            field,
            "filter contains disallowed characters",
            filter,
        ));
    }
    Ok(())
}

/// Every free-form argument must match an allowlist entry verbatim
pub(crate) fn validate_extra_args(args: &[String], allowlist: &[String]) -> Result<()> {
    for arg in args {
        if !allowlist.iter().any(|allowed| allowed == arg) {
            return Err(Error::invalid_value(
                "AdditionalArgs",
                "argument is not in the configured allowlist",
                arg.as_str(),
            ));
        }
    }
    Ok(())
}

/// AES keys are `0x` followed by 64 hex digits
pub(crate) fn validate_aes_key(key: &str) -> Result<()> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .ok_or_else(|| Error::validation("aesKey", "must start with 0x"))?;
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation("aesKey", "must be 64 hexadecimal digits"));
    }
    Ok(())
}
