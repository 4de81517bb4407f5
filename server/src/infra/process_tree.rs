//! Process tree termination
//!
//! Children are started as process-group leaders (plain spawns via
//! `process_group(0)`, PTY spawns via `setsid`), so signalling the group
//! reaches every helper they started.

use tracing::debug;

/// Kill a process and all of its descendants
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("Sent SIGKILL to process group {}", pid),
        Err(e) => debug!("Process group {} not signalled: {}", pid, e),
    }
}

/// Kill a process and all of its descendants
#[cfg(windows)]
pub fn kill_process_tree(pid: u32) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let spawned = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status();

    match spawned {
        Ok(status) => debug!("taskkill for {} finished with {}", pid, status),
        Err(e) => debug!("taskkill for {} failed: {}", pid, e),
    }
}

/// Kills a process tree when dropped, unless disarmed.
///
/// Held across an await so that a dropped caller never leaves helpers behind.
#[derive(Debug)]
pub struct ProcessTreeGuard {
    pid: Option<u32>,
}

impl ProcessTreeGuard {
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessTreeGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            debug!("Run dropped while process {} was alive; killing its tree", pid);
            kill_process_tree(pid);
        }
    }
}
