//! Piped log supervisor
//!
//! A [`PipedLog`] owns one pipe and the consumer process reading from it.
//! The pipe outlives any single consumer: when the consumer dies the
//! supervisor spawns a fresh one on the same read end, so writers keep
//! writing into the pipe buffer across the respawn window.

use errlog_core::{Error, RespawnPolicy, Result};
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cmd;
use crate::scope::{CleanupHandle, ExecFn, ResourceScope, WeakScope};
use crate::watcher::{ExitCallback, ExitReason, ExitWatcher};

/// Lifecycle of a piped log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Spawning,
    Running,
    /// Consumer died while still wanted; a replacement is on its way
    Respawning,
    /// Command line cleared; waiting for the consumer to exit
    Restarting,
    /// Consumer gone and no longer wanted; endpoints still open
    Stopped,
    /// Respawn policy gave up or a respawn failed
    Failed,
    /// Torn down; endpoints closed
    Closed,
}

impl PipeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipeState::Spawning => "spawning",
            PipeState::Running => "running",
            PipeState::Respawning => "respawning",
            PipeState::Restarting => "restarting",
            PipeState::Stopped => "stopped",
            PipeState::Failed => "failed",
            PipeState::Closed => "closed",
        }
    }
}

impl fmt::Display for PipeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Supervision {
    program: Option<String>,
    pid: Option<u32>,
    state: PipeState,
    /// Total respawns over the lifetime of this pipe
    respawns: u32,
    window_start: Instant,
    window_respawns: u32,
}

struct PipedInner {
    /// Command line as configured, kept for display after it is cleared
    command: String,
    sup: Mutex<Supervision>,
    write_end: RwLock<Option<Arc<File>>>,
    read_end: Mutex<Option<OwnedFd>>,
    raw_fds: (RawFd, RawFd),
    watcher: ExitWatcher,
    policy: RespawnPolicy,
    scope: WeakScope,
    cleanup: Mutex<Option<CleanupHandle>>,
    closed: AtomicBool,
}

/// A log destination backed by a supervised consumer process
#[derive(Clone)]
pub struct PipedLog {
    inner: Arc<PipedInner>,
}

impl PipedLog {
    /// Create the pipe, spawn its consumer and tie both to `scope`
    pub fn open(
        scope: &ResourceScope,
        watcher: &ExitWatcher,
        program: &str,
        policy: RespawnPolicy,
    ) -> Result<Self> {
        let program = program.trim();
        if program.is_empty() {
            return Err(Error::config("Empty piped log command"));
        }

        let (read_end, write_end) = cmd::create_pipe()?;
        let raw_fds = (read_end.as_raw_fd(), write_end.as_raw_fd());

        let inner = Arc::new(PipedInner {
            command: program.to_string(),
            sup: Mutex::new(Supervision {
                program: Some(program.to_string()),
                pid: None,
                state: PipeState::Spawning,
                respawns: 0,
                window_start: Instant::now(),
                window_respawns: 0,
            }),
            write_end: RwLock::new(Some(Arc::new(File::from(write_end)))),
            read_end: Mutex::new(Some(read_end)),
            raw_fds,
            watcher: watcher.clone(),
            policy,
            scope: scope.downgrade(),
            cleanup: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let on_release = {
            let inner = Arc::clone(&inner);
            move || inner.teardown()
        };
        let on_exec: ExecFn = Arc::new(move || {
            cmd::close_raw(raw_fds.0);
            cmd::close_raw(raw_fds.1);
        });
        let handle = scope.register("piped log", on_release, Some(on_exec));
        *inner.cleanup.lock() = Some(handle);

        let exec_cleanups = scope.exec_cleanups();
        let spawned = {
            let mut sup = inner.sup.lock();
            inner.spawn(&mut sup, exec_cleanups)
        };

        if let Err(e) = spawned {
            scope.kill(handle);
            inner.closed.store(true, Ordering::SeqCst);
            inner.close_endpoints();
            return Err(e);
        }

        Ok(Self { inner })
    }

    /// Write one complete line to the pipe
    ///
    /// Fails at once when no consumer will ever drain the pipe. The write
    /// runs with no lock held.
    pub fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let state = self.state();
        if matches!(state, PipeState::Stopped | PipeState::Failed | PipeState::Closed) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("piped log '{}' is {}", self.inner.command, state),
            ));
        }

        let file = self.inner.write_end.read().clone();
        match file {
            Some(file) => {
                let mut writer: &File = &file;
                writer.write_all(line)?;
                writer.flush()
            }
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "piped log closed")),
        }
    }

    /// Administrative restart: stop wanting a consumer and ask the live one to exit
    pub fn restart(&self) {
        self.inner.restart();
    }

    /// Tear down now instead of waiting for the owning scope
    pub fn close(&self) {
        let handle = self.inner.cleanup.lock().take();
        if let (Some(handle), Some(scope)) = (handle, self.inner.scope.upgrade()) {
            scope.kill(handle);
        }
        self.inner.teardown();
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// Command line while a consumer is still wanted
    pub fn program(&self) -> Option<String> {
        self.inner.sup.lock().program.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.sup.lock().pid
    }

    pub fn state(&self) -> PipeState {
        self.inner.sup.lock().state
    }

    pub fn respawns(&self) -> u32 {
        self.inner.sup.lock().respawns
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Raw write end, for redirecting stderr onto the pipe
    pub fn write_fd(&self) -> Option<RawFd> {
        self.inner.write_end.read().as_ref().map(|f| f.as_raw_fd())
    }

    pub fn ptr_eq(&self, other: &PipedLog) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PipedInner {
    /// Exec callbacks of the owning scope
    ///
    /// Must be called without `sup` held: dropping the upgraded scope may
    /// release it, and release tears this pipe down.
    fn exec_cleanups(&self) -> Vec<ExecFn> {
        self.scope
            .upgrade()
            .map(|scope| scope.exec_cleanups())
            .unwrap_or_default()
    }

    fn spawn(self: &Arc<Self>, sup: &mut Supervision, exec_cleanups: Vec<ExecFn>) -> Result<()> {
        let program = sup
            .program
            .clone()
            .ok_or_else(|| Error::config("Piped log is no longer wanted"))?;

        sup.state = PipeState::Spawning;

        let stdin = {
            let read_end = self.read_end.lock();
            match read_end.as_ref() {
                Some(fd) => fd.try_clone()?,
                None => return Err(Error::spawn(program, "pipe closed")),
            }
        };

        let child = cmd::spawn_consumer(&cmd::tokenize(&program), stdin, exec_cleanups)?;

        let weak = Arc::downgrade(self);
        let callback: ExitCallback = Arc::new(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.maintenance(reason);
            }
        });
        let pid = self.watcher.register(child, callback);

        sup.pid = Some(pid);
        sup.state = PipeState::Running;
        Ok(())
    }

    fn maintenance(self: &Arc<Self>, reason: ExitReason) {
        match reason {
            ExitReason::Death(_) | ExitReason::Lost => self.on_exit(reason),
            ExitReason::Unwritable => {
                // May only be full; a stalled consumer is left alone.
                debug!("Piped log '{}' is not draining", self.command);
            }
            ExitReason::Restart => self.restart(),
            ExitReason::Unregister => {}
        }
    }

    fn on_exit(self: &Arc<Self>, reason: ExitReason) {
        let exec_cleanups = self.exec_cleanups();
        let mut sup = self.sup.lock();
        sup.pid = None;

        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if sup.program.is_none() {
            debug!("Piped log consumer '{}' exited during restart", self.command);
            sup.state = PipeState::Stopped;
            return;
        }

        warn!("Piped log consumer '{}' gone ({:?}), respawning", self.command, reason);

        if !self.allow_respawn(&mut sup) {
            error!(
                "Piped log '{}' exceeded {} respawns in {}s, giving up",
                self.command, self.policy.max_restarts, self.policy.crash_window_secs
            );
            sup.state = PipeState::Failed;
            return;
        }

        sup.respawns += 1;
        sup.state = PipeState::Respawning;

        let delay = self.policy.restart_delay();
        if delay.is_zero() {
            self.respawn(&mut sup, exec_cleanups);
            return;
        }

        drop(sup);
        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("piped-log-respawn".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                let exec_cleanups = inner.exec_cleanups();
                let mut sup = inner.sup.lock();
                if sup.state == PipeState::Respawning && !inner.closed.load(Ordering::SeqCst) {
                    inner.respawn(&mut sup, exec_cleanups);
                }
            });
        if let Err(e) = spawned {
            error!("Unable to schedule respawn of '{}': {}", self.command, e);
            self.sup.lock().state = PipeState::Failed;
        }
    }

    fn respawn(self: &Arc<Self>, sup: &mut Supervision, exec_cleanups: Vec<ExecFn>) {
        match self.spawn(sup, exec_cleanups) {
            Ok(()) => info!("Respawned piped log consumer '{}'", self.command),
            Err(e) => {
                error!("Unable to respawn '{}': {}", self.command, e);
                sup.state = PipeState::Failed;
            }
        }
    }

    fn allow_respawn(&self, sup: &mut Supervision) -> bool {
        if self.policy.is_unlimited() {
            return true;
        }

        let now = Instant::now();
        if now.duration_since(sup.window_start) > self.policy.crash_window() {
            sup.window_start = now;
            sup.window_respawns = 0;
        }

        if sup.window_respawns >= self.policy.max_restarts {
            return false;
        }
        sup.window_respawns += 1;
        true
    }

    fn restart(&self) {
        let mut sup = self.sup.lock();
        if sup.program.take().is_none() {
            return;
        }

        match sup.pid {
            Some(pid) => {
                sup.state = PipeState::Restarting;
                info!("Restarting: asking consumer {} of '{}' to exit", pid, self.command);
                self.watcher.signal(pid, Signal::SIGTERM);
            }
            None => sup.state = PipeState::Stopped,
        }
    }

    fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (pid, signalled) = {
            let mut sup = self.sup.lock();
            let signalled = sup.state == PipeState::Restarting;
            sup.program = None;
            sup.state = PipeState::Closed;
            (sup.pid.take(), signalled)
        };

        if let Some(child) = pid.and_then(|pid| self.watcher.unregister(pid)) {
            if signalled {
                // Already sent SIGTERM by restart.
                cmd::reap_in_background(child, self.policy.kill_timeout());
            } else {
                cmd::terminate_and_reap(child, self.policy.kill_timeout());
            }
        }

        self.close_endpoints();
        debug!("Closed piped log '{}'", self.command);
    }

    /// Read end first, so a writer blocked on a full pipe gets EPIPE
    fn close_endpoints(&self) {
        self.read_end.lock().take();
        self.write_end.write().take();
    }
}

impl fmt::Debug for PipedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipedLog")
            .field("command", &self.inner.command)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Script that appends its stdin to `out`
    fn sink_script(dir: &Path, out: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("sink.sh");
        std::fs::write(&script, format!("#!/bin/sh\nexec cat >> {}\n", out.display())).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    fn wait_for<F: FnMut() -> bool>(mut cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        cond()
    }

    fn lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn kill_consumer(pipe: &PipedLog) -> u32 {
        let pid = pipe.pid().unwrap();
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
        pid
    }

    #[test]
    fn test_open_spawns_consumer() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.log");
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();

        let pipe = PipedLog::open(&scope, &watcher, &sink_script(dir.path(), &out), RespawnPolicy::default()).unwrap();
        assert_eq!(pipe.state(), PipeState::Running);
        assert!(watcher.is_registered(pipe.pid().unwrap()));

        pipe.write_line(b"first line\n").unwrap();
        assert!(wait_for(|| lines(&out) == vec!["first line"]));

        scope.release();
        assert!(pipe.is_closed());
        assert_eq!(pipe.state(), PipeState::Closed);
    }

    #[test]
    fn test_open_missing_program_fails() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();

        let err = PipedLog::open(&scope, &watcher, "/nonexistent/rotatelogs x", RespawnPolicy::default())
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert!(scope.is_empty());
        assert!(watcher.is_empty());
    }

    #[test]
    fn test_open_empty_command_fails() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        assert!(PipedLog::open(&scope, &watcher, "   ", RespawnPolicy::default()).is_err());
    }

    #[test]
    fn test_killed_consumer_is_respawned() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.log");
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, &sink_script(dir.path(), &out), RespawnPolicy::default()).unwrap();

        for i in 1..=3 {
            pipe.write_line(format!("line {}\n", i).as_bytes()).unwrap();
        }
        assert!(wait_for(|| lines(&out).len() == 3));

        let old = kill_consumer(&pipe);
        assert!(wait_for(|| watcher.reap_once() > 0));

        // Written before or after the respawn, the pipe buffers it.
        pipe.write_line(b"line 4\n").unwrap();

        assert_eq!(pipe.state(), PipeState::Running);
        assert_ne!(pipe.pid(), Some(old));
        assert_eq!(pipe.respawns(), 1);
        assert!(wait_for(|| lines(&out).len() == 4));
        assert_eq!(lines(&out), vec!["line 1", "line 2", "line 3", "line 4"]);

        scope.release();
    }

    #[test]
    fn test_restart_stops_without_respawn() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();

        pipe.restart();
        assert_eq!(pipe.program(), None);
        assert_eq!(pipe.state(), PipeState::Restarting);

        assert!(wait_for(|| watcher.reap_once() > 0));
        assert_eq!(pipe.state(), PipeState::Stopped);
        assert_eq!(pipe.pid(), None);
        assert!(watcher.is_empty());
        assert_eq!(pipe.respawns(), 0);
        assert_eq!(pipe.command(), "cat");

        // Endpoints survive until teardown, but nothing drains them
        assert!(pipe.write_fd().is_some());
        let err = pipe.write_line(b"after restart\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        scope.release();
        assert!(pipe.write_fd().is_none());
    }

    #[test]
    fn test_restart_broadcast() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let a = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();
        let b = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();

        watcher.broadcast(ExitReason::Restart);
        assert!(wait_for(|| {
            watcher.reap_once();
            watcher.is_empty()
        }));
        assert_eq!(a.state(), PipeState::Stopped);
        assert_eq!(b.state(), PipeState::Stopped);
        scope.release();
    }

    #[test]
    fn test_unwritable_is_ignored() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();
        let pid = pipe.pid();

        watcher.broadcast(ExitReason::Unwritable);
        assert_eq!(pipe.state(), PipeState::Running);
        assert_eq!(pipe.pid(), pid);
        scope.release();
    }

    #[test]
    fn test_teardown_runs_once() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();

        pipe.close();
        assert!(pipe.is_closed());
        assert!(watcher.is_empty());
        assert!(scope.is_empty());
        assert!(pipe.write_line(b"late\n").is_err());

        pipe.close();
        scope.release();
        assert_eq!(pipe.state(), PipeState::Closed);
    }

    #[test]
    fn test_teardown_racing_death_notification() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();

        kill_consumer(&pipe);
        // Let the child die but deliver the notification only after teardown
        std::thread::sleep(Duration::from_millis(100));
        scope.release();
        watcher.reap_once();

        assert_eq!(pipe.state(), PipeState::Closed);
        assert_eq!(pipe.respawns(), 0);
        assert!(watcher.is_empty());
    }

    #[test]
    fn test_respawn_cap() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let policy = RespawnPolicy {
            max_restarts: 1,
            ..RespawnPolicy::default()
        };
        let pipe = PipedLog::open(&scope, &watcher, "cat", policy).unwrap();

        kill_consumer(&pipe);
        assert!(wait_for(|| watcher.reap_once() > 0));
        assert_eq!(pipe.state(), PipeState::Running);

        kill_consumer(&pipe);
        assert!(wait_for(|| watcher.reap_once() > 0));
        assert_eq!(pipe.state(), PipeState::Failed);
        assert_eq!(pipe.respawns(), 1);
        assert!(watcher.is_empty());
        scope.release();
    }

    #[test]
    fn test_delayed_respawn() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let policy = RespawnPolicy {
            restart_delay_ms: 50,
            ..RespawnPolicy::default()
        };
        let pipe = PipedLog::open(&scope, &watcher, "cat", policy).unwrap();

        kill_consumer(&pipe);
        assert!(wait_for(|| watcher.reap_once() > 0));
        assert!(wait_for(|| pipe.state() == PipeState::Running));
        assert_eq!(pipe.respawns(), 1);
        scope.release();
    }

    #[test]
    fn test_close_while_writer_blocked_on_full_pipe() {
        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let pipe = PipedLog::open(&scope, &watcher, "sleep 30", RespawnPolicy::default()).unwrap();
        let (tx, rx) = mpsc::channel();

        let writer = {
            let pipe = pipe.clone();
            let tx = tx.clone();
            std::thread::spawn(move || {
                let chunk = vec![b'x'; 4096];
                for _ in 0..64 {
                    let _ = pipe.write_line(&chunk);
                }
                tx.send("writer").unwrap();
            })
        };

        // Enough time for the writer to fill the pipe and block
        std::thread::sleep(Duration::from_millis(300));
        let closer = {
            let pipe = pipe.clone();
            std::thread::spawn(move || {
                pipe.close();
                tx.send("close").unwrap();
            })
        };

        let mut done = vec![
            rx.recv_timeout(Duration::from_secs(5)).expect("blocked after close"),
            rx.recv_timeout(Duration::from_secs(5)).expect("blocked after close"),
        ];
        done.sort();
        assert_eq!(done, vec!["close", "writer"]);
        writer.join().unwrap();
        closer.join().unwrap();

        assert!(pipe.is_closed());
        assert!(watcher.is_empty());
        assert!(pipe.write_line(b"late\n").is_err());
    }

    #[test]
    fn test_scope_dropped_while_consumer_respawns() {
        let watcher = ExitWatcher::new();

        for _ in 0..20 {
            let scope = ResourceScope::new("test");
            let pipe = PipedLog::open(&scope, &watcher, "cat", RespawnPolicy::default()).unwrap();
            kill_consumer(&pipe);
            std::thread::sleep(Duration::from_millis(20));

            let (tx, rx) = mpsc::channel();
            let reaper = {
                let watcher = watcher.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    watcher.reap_once();
                    tx.send(()).unwrap();
                })
            };
            let dropper = std::thread::spawn(move || {
                drop(scope);
                tx.send(()).unwrap();
            });

            for _ in 0..2 {
                rx.recv_timeout(Duration::from_secs(5)).expect("deadlocked on scope drop");
            }
            reaper.join().unwrap();
            dropper.join().unwrap();

            assert!(pipe.is_closed());
            assert_eq!(pipe.state(), PipeState::Closed);
        }

        assert!(wait_for(|| {
            watcher.reap_once();
            watcher.is_empty()
        }));
    }

    #[test]
    fn test_close_after_restart_signals_once() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let out = dir.path().join("signals.log");
        let script = dir.path().join("stubborn.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\ntrap 'echo term >> {}' TERM\nwhile :; do sleep 0.1; done\n",
                out.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scope = ResourceScope::new("test");
        let watcher = ExitWatcher::new();
        let policy = RespawnPolicy {
            kill_timeout_ms: 300,
            ..RespawnPolicy::default()
        };
        let pipe = PipedLog::open(&scope, &watcher, &script.display().to_string(), policy).unwrap();
        // Give the shell time to install its trap
        std::thread::sleep(Duration::from_millis(200));

        pipe.restart();
        assert!(wait_for(|| lines(&out) == vec!["term"]));
        assert_eq!(pipe.state(), PipeState::Restarting);

        scope.release();
        assert_eq!(pipe.state(), PipeState::Closed);

        // Past the kill timeout the reaper has sent SIGKILL, never a second SIGTERM
        std::thread::sleep(Duration::from_millis(800));
        assert_eq!(lines(&out), vec!["term"]);
    }
}
