//! Pseudo-terminal sessions
//!
//! A `PtySession` runs one child attached to a virtual terminal. Stdout and
//! stderr arrive merged on a single byte stream, exactly as a real console
//! would show them. Blocking PTY reads, writes and the exit wait run on
//! tokio's blocking pool.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process_tree::kill_process_tree;
use crate::error::{Error, Result};

/// Chunks buffered between the blocking reader and the consumer
const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 4096;

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Program to launch inside a terminal
#[derive(Debug, Clone)]
pub struct TerminalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Stream of raw terminal output chunks
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

/// Interactive child process attached to a terminal
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Launch the child; allowed once per session
    fn start(&self, command: &TerminalCommand, size: TerminalSize) -> Result<()>;

    /// Take the output stream. Cancelling `cancel` makes the stream yield
    /// `Error::Cancelled` without touching the child.
    fn read_output(&self, cancel: CancellationToken) -> Result<OutputStream>;

    /// Send raw bytes to the child's input
    async fn write_input(&self, data: &[u8], cancel: &CancellationToken) -> Result<()>;

    /// Propagate a dimension change to the running child
    fn resize(&self, size: TerminalSize) -> Result<()>;

    /// Wait for the child to terminate. Cancellation aborts the wait only.
    async fn wait_for_exit(&self, cancel: &CancellationToken) -> Result<i32>;

    /// Forcibly terminate the child and its descendants; idempotent
    fn kill(&self) -> Result<()>;

    /// Release terminal handles, killing the child if still running; idempotent
    fn dispose(&self);
}

/// Creates a fresh terminal per streaming session
pub trait TerminalFactory: Send + Sync {
    fn create(&self) -> Box<dyn Terminal>;
}

/// Factory producing native pseudo-terminals
#[derive(Debug, Default, Clone)]
pub struct PtySessionFactory;

impl TerminalFactory for PtySessionFactory {
    fn create(&self) -> Box<dyn Terminal> {
        Box::new(PtySession::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Disposed,
}

struct SessionState {
    lifecycle: Lifecycle,
    killed: bool,
    pid: Option<u32>,
    size: Option<TerminalSize>,
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    output_rx: Option<mpsc::Receiver<Bytes>>,
}

/// Native pseudo-terminal session backed by `portable-pty`
pub struct PtySession {
    state: Mutex<SessionState>,
    exit_tx: Arc<watch::Sender<Option<i32>>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl PtySession {
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = watch::channel(None);
        Self {
            state: Mutex::new(SessionState {
                lifecycle: Lifecycle::Created,
                killed: false,
                pid: None,
                size: None,
                master: None,
                writer: None,
                killer: None,
                output_rx: None,
            }),
            exit_tx: Arc::new(exit_tx),
            exit_rx,
        }
    }

    /// Current dimensions, once started
    pub fn size(&self) -> Option<TerminalSize> {
        self.lock().ok().and_then(|s| s.size)
    }

    /// Whether the child has terminated or been killed
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some() || self.lock().map(|s| s.killed).unwrap_or(true)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("PTY session lock poisoned".to_string()))
    }

    /// Lock and fail with `ObjectDisposed` if the session is gone
    fn live(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        let state = self.lock()?;
        if state.lifecycle == Lifecycle::Disposed {
            return Err(Error::ObjectDisposed);
        }
        Ok(state)
    }
}

impl Default for PtySession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Terminal for PtySession {
    fn start(&self, command: &TerminalCommand, size: TerminalSize) -> Result<()> {
        let mut state = self.live()?;
        if state.lifecycle != Lifecycle::Created {
            return Err(Error::SessionState("session already started".to_string()));
        }

        let pair = native_pty_system()
            .openpty(size.to_pty_size())
            .map_err(|e| Error::Pty(format!("failed to open pseudo-terminal: {}", e)))?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        if let Some(cwd) = &command.cwd {
            cmd.cwd(cwd);
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::ProcessStart {
                executable: command.program.display().to_string(),
                reason: e.to_string(),
            })?;
        // Only the child keeps the slave side open, so EOF follows its exit.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(format!("failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(format!("failed to take PTY writer: {}", e)))?;

        let pid = child.process_id();
        let killer = child.clone_killer();

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || pump_output(reader, output_tx));

        let exit_tx = self.exit_tx.clone();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    warn!("Failed to wait for PTY child: {}", e);
                    -1
                }
            };
            debug!("PTY child exited with code {}", code);
            exit_tx.send_replace(Some(code));
        });

        info!(
            "Started {} in PTY (pid {:?}, {}x{})",
            command.program.display(),
            pid,
            size.cols,
            size.rows
        );

        state.lifecycle = Lifecycle::Running;
        state.pid = pid;
        state.size = Some(size);
        state.master = Some(pair.master);
        state.writer = Some(Arc::new(Mutex::new(writer)));
        state.killer = Some(killer);
        state.output_rx = Some(output_rx);
        Ok(())
    }

    fn read_output(&self, cancel: CancellationToken) -> Result<OutputStream> {
        let mut state = self.live()?;
        if state.lifecycle == Lifecycle::Created {
            return Err(Error::SessionState("session not started".to_string()));
        }
        let rx = state
            .output_rx
            .take()
            .ok_or_else(|| Error::SessionState("output stream already taken".to_string()))?;

        let chunks = ReceiverStream::new(rx);
        let output = stream::unfold(Some((chunks, cancel)), |st| async move {
            let (mut chunks, cancel) = st?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Some((Err(Error::Cancelled), None)),
                chunk = chunks.next() => chunk.map(|c| (Ok(c), Some((chunks, cancel)))),
            }
        });

        Ok(output.boxed())
    }

    async fn write_input(&self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let writer = {
            let state = self.live()?;
            if state.lifecycle == Lifecycle::Created {
                return Err(Error::SessionState("session not started".to_string()));
            }
            if state.killed || self.exit_rx.borrow().is_some() {
                return Err(Error::SessionState("process has exited".to_string()));
            }
            state
                .writer
                .clone()
                .ok_or_else(|| Error::SessionState("input is closed".to_string()))?
        };

        let data = data.to_vec();
        let write = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| std::io::Error::other("PTY writer lock poisoned"))?;
            writer.write_all(&data)?;
            writer.flush()
        });

        tokio::select! {
            joined = write => joined
                .map_err(|e| Error::Internal(format!("PTY write task failed: {}", e)))?
                .map_err(|e| Error::Pty(format!("failed to write input: {}", e))),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    fn resize(&self, size: TerminalSize) -> Result<()> {
        let mut state = self.live()?;
        let master = state
            .master
            .as_ref()
            .ok_or_else(|| Error::SessionState("session not started".to_string()))?;
        master
            .resize(size.to_pty_size())
            .map_err(|e| Error::Pty(format!("failed to resize: {}", e)))?;
        debug!("Resized PTY to {}x{}", size.cols, size.rows);
        state.size = Some(size);
        Ok(())
    }

    async fn wait_for_exit(&self, cancel: &CancellationToken) -> Result<i32> {
        {
            let state = self.live()?;
            if state.lifecycle == Lifecycle::Created {
                return Err(Error::SessionState("session not started".to_string()));
            }
        }

        let mut exit_rx = self.exit_rx.clone();
        tokio::select! {
            code = exit_rx.wait_for(Option::is_some) => {
                let code = code.map_err(|_| Error::Internal("exit watcher dropped".to_string()))?;
                Ok((*code).unwrap_or(-1))
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    fn kill(&self) -> Result<()> {
        let mut state = self.live()?;
        if state.killed || self.exit_rx.borrow().is_some() {
            state.killed = true;
            return Ok(());
        }
        state.killed = true;

        if let Some(pid) = state.pid {
            info!("Killing PTY process tree {}", pid);
            kill_process_tree(pid);
        }
        if let Some(killer) = state.killer.as_mut() {
            if let Err(e) = killer.kill() {
                debug!("PTY child kill returned: {}", e);
            }
        }
        Ok(())
    }

    fn dispose(&self) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        if state.lifecycle == Lifecycle::Disposed {
            return;
        }

        let running = state.lifecycle == Lifecycle::Running
            && !state.killed
            && self.exit_rx.borrow().is_none();
        if running {
            if let Some(pid) = state.pid {
                kill_process_tree(pid);
            }
            if let Some(killer) = state.killer.as_mut() {
                let _ = killer.kill();
            }
            state.killed = true;
        }

        state.writer = None;
        state.master = None;
        state.killer = None;
        state.output_rx = None;
        state.lifecycle = Lifecycle::Disposed;
        debug!("PTY session disposed");
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Blocking read loop feeding the output channel until EOF or consumer loss
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Bytes>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    debug!("PTY output consumer gone");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the slave side closes.
                debug!("PTY read ended: {}", e);
                break;
            }
        }
    }
}
