//! Tool adapters
//!
//! Each adapter turns a domain command into an argv through its builder, runs
//! it on the shared `ProcessRunner` and maps the outcome to a result DTO or a
//! typed error. Adapters share the leaf components by composition.

mod retoc;
mod uasset;
mod uwp;

pub use retoc::{RetocAdapter, RetocResult};
pub use uasset::{UAssetAdapter, UAssetResult};
pub use uwp::{UwpDumpAdapter, UwpDumpResult};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::config::Config;
use crate::domain::command::{RetocCommand, ToolKind, UAssetCommand, UwpDumpCommand};
use crate::domain::types::{ProcessResult, ProgressCallback, ProgressEvent};
use crate::error::{Error, Result};
use crate::infra::output_sink::excerpt;
use crate::infra::process_runner::ProcessRunner;
use crate::infra::tool_registry::ToolRegistry;
use crate::service::command::{check_absolute, BuiltCommand};

/// Accessors every tool command provides to the adapter machinery
pub trait ToolCommand: Send + Sync {
    fn operation_id(&self) -> &str;
    fn working_directory(&self) -> Option<&Path>;
    fn timeout_seconds(&self) -> Option<u64>;
}

impl ToolCommand for RetocCommand {
    fn operation_id(&self) -> &str {
        &self.operation_id
    }
    fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }
    fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }
}

impl ToolCommand for UAssetCommand {
    fn operation_id(&self) -> &str {
        &self.operation_id
    }
    fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }
    fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }
}

impl ToolCommand for UwpDumpCommand {
    fn operation_id(&self) -> &str {
        &self.operation_id
    }
    fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }
    fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }
}

/// Components shared by all adapters
#[derive(Clone)]
pub struct AdapterContext {
    pub config: Arc<Config>,
    pub registry: Arc<ToolRegistry>,
    pub runner: ProcessRunner,
}

impl AdapterContext {
    pub fn new(config: Arc<Config>, registry: Arc<ToolRegistry>) -> Self {
        let runner = ProcessRunner::new(config.output_limits());
        Self {
            config,
            registry,
            runner,
        }
    }

    /// Non-zero exit as a typed error with bounded output excerpts
    pub fn tool_failure(&self, result: &ProcessResult) -> Error {
        let limits = self.config.excerpt_limits();
        Error::ToolExecution {
            exit_code: result.exit_code,
            stdout: excerpt(&result.stdout, limits),
            stderr: excerpt(&result.stderr, limits),
        }
    }
}

/// One wrapped external tool
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    type Command: ToolCommand;
    type Output: Serialize + Send;

    fn tool(&self) -> ToolKind;

    fn context(&self) -> &AdapterContext;

    /// Validate `command` and render its argv for `executable`
    fn build_command(&self, command: &Self::Command, executable: &Path) -> Result<BuiltCommand>;

    /// Interpret a finished process; non-zero exit codes become typed errors
    fn map_result(&self, command: &Self::Command, result: ProcessResult) -> Result<Self::Output>;

    /// Resolve the tool and render the argv without running anything
    fn preview(&self, command: &Self::Command) -> Result<BuiltCommand> {
        let executable = self.context().registry.resolve(self.tool())?;
        self.build_command(command, &executable)
    }

    /// Run `command` to completion, reporting progress through `progress`
    async fn execute(
        &self,
        command: &Self::Command,
        cancel: &CancellationToken,
        progress: ProgressCallback,
    ) -> Result<Self::Output> {
        let ctx = self.context();
        let tool = self.tool();
        let operation_id = command.operation_id().to_string();

        progress(ProgressEvent::new("resolve", format!("Locating {}", tool.as_str())).with_percent(0));
        let executable = ctx.registry.resolve(tool)?;

        progress(ProgressEvent::new("validate", "Validating request").with_percent(10));
        let built = self.build_command(command, &executable)?;
        if let Some(dir) = command.working_directory() {
            check_absolute("workingDirectory", dir)?;
        }

        let timeout = command
            .timeout_seconds()
            .unwrap_or(ctx.config.default_timeout_secs);
        progress(
            ProgressEvent::new("execute", format!("Running {}", tool.as_str()))
                .with_percent(20)
                .with_detail(built.command_line()),
        );

        let span = info_span!("tool", tool = tool.as_str(), operation_id = %operation_id);
        let result = async {
            info!("Executing {}", built.command_line());
            ctx.runner
                .execute(
                    &built.executable_path,
                    &built.arguments(),
                    command.working_directory(),
                    timeout as i64,
                    None,
                    cancel,
                )
                .await
        }
        .instrument(span)
        .await?;

        let output = self.map_result(command, result)?;
        progress(ProgressEvent::new("complete", "Completed").with_percent(100));
        Ok(output)
    }
}

/// Best-effort check for tool output that indicates missing privileges
pub(crate) fn looks_like_elevation_failure(result: &ProcessResult) -> bool {
    const MARKERS: [&str; 4] = [
        "access is denied",
        "access denied",
        "requires elevation",
        "administrator",
    ];
    let stderr = result.stderr.to_lowercase();
    let stdout = result.stdout.to_lowercase();
    MARKERS
        .iter()
        .any(|m| stderr.contains(m) || stdout.contains(m))
}
