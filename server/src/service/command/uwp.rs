//! UWP dumper arguments

use std::path::Path;

use super::{check_executable, require_absolute, BuiltCommand, CommandArg};
use crate::config::Config;
use crate::domain::command::UwpDumpCommand;
use crate::error::{Error, Result};

/// Render `-p <pid> -d <dir>`
pub fn build_uwp(command: &UwpDumpCommand, _config: &Config, executable: &Path) -> Result<BuiltCommand> {
    check_executable(executable)?;

    let pid = match command.process_id {
        Some(pid) if pid > 0 => pid,
        Some(pid) => {
            return Err(Error::invalid_value(
                "processId",
                "must be greater than zero",
                pid.to_string(),
            ))
        }
        None => return Err(Error::validation("processId", "is required")),
    };
    let output = require_absolute("outputPath", command.output_path.as_ref())?;

    let mut built = BuiltCommand::new(executable);
    built
        .push(CommandArg::token("-p"))
        .push(CommandArg::token(pid.to_string()))
        .push(CommandArg::token("-d"))
        .push(CommandArg::path(output));
    Ok(built)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_dump_arguments() {
        let mut cmd = UwpDumpCommand::new();
        cmd.process_id = Some(4242);
        cmd.output_path = Some(PathBuf::from("/dumps/game"));

        let built = build_uwp(&cmd, &Config::default(), Path::new("/opt/UWPInjector")).unwrap();
        assert_eq!(built.arguments(), vec!["-p", "4242", "-d", "/dumps/game"]);
        assert_eq!(
            built.command_line(),
            "\"/opt/UWPInjector\" -p 4242 -d \"/dumps/game\""
        );
    }

    #[test]
    fn test_process_id_is_validated() {
        let mut cmd = UwpDumpCommand::new();
        cmd.output_path = Some(PathBuf::from("/dumps/game"));
        assert!(build_uwp(&cmd, &Config::default(), Path::new("/opt/UWPInjector")).is_err());

        cmd.process_id = Some(0);
        let info = build_uwp(&cmd, &Config::default(), Path::new("/opt/UWPInjector"))
            .unwrap_err()
            .to_info();
        assert!(info.message.contains("processId"));
    }
}
