//! Consumer command handling - argv tokenizing, spawning and termination

use errlog_core::{Error, Result};
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{close, pipe2, Pid};
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::scope::ExecFn;

/// Split a command line on whitespace; no quoting
pub fn tokenize(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Locate the program, searching PATH when it is a bare name
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::spawn(program, "No such file or directory"));
    }

    which::which(program).map_err(|_| Error::spawn(program, "Command not found"))
}

/// Create a pipe whose ends are both close-on-exec
pub fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)
}

/// Close a raw descriptor without taking ownership of it
///
/// Only for exec cleanups, which run in a forked child.
pub fn close_raw(fd: RawFd) {
    // EBADF on a descriptor that is already gone is fine here.
    let _ = close(fd);
}

/// Spawn `argv` with `stdin` as its standard input
///
/// `exec_cleanups` run in the child between fork and exec.
pub fn spawn_consumer(argv: &[String], stdin: OwnedFd, exec_cleanups: Vec<ExecFn>) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::config("Empty piped log command"))?;
    let path = resolve_program(program)?;

    let mut cmd = Command::new(&path);
    cmd.args(args).stdin(Stdio::from(stdin));

    if !exec_cleanups.is_empty() {
        // SAFETY: exec cleanups only close descriptors, which is
        // async-signal-safe, and the snapshot needs no locking after fork.
        unsafe {
            cmd.pre_exec(move || {
                for cleanup in &exec_cleanups {
                    cleanup();
                }
                Ok(())
            });
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::spawn(path.display().to_string(), e))?;

    info!("Started piped log consumer {} with PID {}", path.display(), child.id());
    Ok(child)
}

/// Send SIGTERM to `pid`
pub fn terminate(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!("SIGTERM to {} failed: {}", pid, e);
            false
        }
    }
}

/// Terminate a child we own and reap it in the background
///
/// The child gets SIGTERM once; if it is still running after `timeout`, it
/// is killed.
pub fn terminate_and_reap(mut child: Child, timeout: Duration) {
    if !terminate(child.id()) {
        let _ = child.try_wait();
        return;
    }
    reap_in_background(child, timeout);
}

/// Wait for a child that has already been asked to exit
///
/// No further SIGTERM is sent; SIGKILL follows once `timeout` has passed.
pub fn reap_in_background(mut child: Child, timeout: Duration) {
    let pid = child.id();
    let spawned = std::thread::Builder::new()
        .name(format!("reap-{}", pid))
        .spawn(move || {
            let deadline = Instant::now() + timeout;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("Consumer {} exited: {}", pid, status);
                        return;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Ok(None) => {
                        warn!("Consumer {} didn't stop gracefully, sending SIGKILL", pid);
                        let _ = child.kill();
                        let _ = child.wait();
                        return;
                    }
                    Err(e) => {
                        warn!("Error waiting for consumer {}: {}", pid, e);
                        return;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start reaper thread for consumer {}: {}", pid, e);
    }
}
