//! One-shot process execution with bounded output capture

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output_sink::{BoundedOutputSink, OutputLimits};
use super::process_tree::{kill_process_tree, ProcessTreeGuard};
use crate::domain::types::ProcessResult;
use crate::error::{Error, Result, TimeoutReason};

/// How long to wait for the output pipes to close after the child exits
const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Stopped(TimeoutReason),
}

/// Runs external tools to completion, racing exit against timeout and cancellation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    limits: OutputLimits,
    drain_grace: Duration,
}

impl ProcessRunner {
    /// Create a runner whose stdout and stderr each get `limits`
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            limits,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn limits(&self) -> OutputLimits {
        self.limits
    }

    /// Run `executable` with `args` until it exits.
    ///
    /// A `timeout_seconds` of zero or less disables the timeout. A non-zero
    /// exit code is returned as data; only spawn failures, timeouts and
    /// cancellation are errors. On timeout or cancellation the whole process
    /// tree is killed before returning.
    pub async fn execute(
        &self,
        executable: &Path,
        args: &[String],
        working_dir: Option<&Path>,
        timeout_seconds: i64,
        env: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<ProcessResult> {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env) = env {
            cmd.envs(env.iter());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let started_at = Utc::now();
        let clock = Instant::now();

        let mut child = cmd.spawn().map_err(|e| Error::ProcessStart {
            executable: executable.display().to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        // Declared after `child` so the tree dies before `kill_on_drop` reaps the leader.
        let mut tree_guard = ProcessTreeGuard::new(pid);

        info!(
            "Started {} (pid {:?}) with {} argument(s)",
            executable.display(),
            pid,
            args.len()
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".to_string()))?;

        let stdout_task = tokio::spawn(drain_lines(stdout, self.limits));
        let stderr_task = tokio::spawn(drain_lines(stderr, self.limits));

        let deadline = async {
            if timeout_seconds > 0 {
                sleep(Duration::from_secs(timeout_seconds as u64)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = deadline => Outcome::Stopped(TimeoutReason::Elapsed {
                seconds: timeout_seconds.max(0) as u64,
            }),
            _ = cancel.cancelled() => Outcome::Stopped(TimeoutReason::Cancelled),
        };

        let status = match outcome {
            Outcome::Exited(status) => status?,
            Outcome::Stopped(reason) => {
                warn!(
                    "{} (pid {:?}) {}; killing process tree",
                    executable.display(),
                    pid,
                    reason
                );
                if let Some(pid) = pid {
                    kill_process_tree(pid);
                }
                tree_guard.disarm();
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Timeout(reason));
            }
        };

        let drain = async move {
            let out = stdout_task.await;
            let err = stderr_task.await;
            (out, err)
        };
        tokio::pin!(drain);

        let (out, err) = match timeout(self.drain_grace, &mut drain).await {
            Ok(pair) => pair,
            Err(_) => {
                // A helper that inherited the pipes is still holding them open.
                debug!("Output pipes still open after exit; killing leftover process group");
                if let Some(pid) = pid {
                    kill_process_tree(pid);
                }
                drain.await
            }
        };
        tree_guard.disarm();

        let stdout = out
            .map_err(|e| Error::Internal(format!("stdout reader failed: {}", e)))?
            .into_string();
        let stderr = err
            .map_err(|e| Error::Internal(format!("stderr reader failed: {}", e)))?
            .into_string();

        let exit_code = status.code().unwrap_or(-1);
        let duration = clock.elapsed();

        info!(
            "{} exited with code {} after {:?}",
            executable.display(),
            exit_code,
            duration
        );

        Ok(ProcessResult {
            exit_code,
            stdout,
            stderr,
            duration,
            started_at,
            ended_at: Utc::now(),
        })
    }
}

/// Read `reader` line by line into a fresh sink, draining to EOF even after truncation
async fn drain_lines<R>(reader: R, limits: OutputLimits) -> BoundedOutputSink
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut sink = BoundedOutputSink::new(limits);
    let mut buf = Vec::new();
    // An unterminated line longer than this is split; the first piece already exceeds the budget.
    let line_cap = limits.max_bytes as u64 + 1;

    loop {
        buf.clear();
        let read = (&mut reader).take(line_cap).read_until(b'\n', &mut buf).await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.append(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }

    sink
}
