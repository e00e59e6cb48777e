//! Exit watcher - death notifications for supervised consumer processes
//!
//! Registered children are polled with `try_wait`; a child that has exited is
//! removed from the table before its callback runs, so a callback is free to
//! register a replacement.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Why a callback is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The child exited and was reaped
    Death(ExitStatus),
    /// The child's status could not be determined
    Lost,
    /// The consumer is not draining its pipe
    Unwritable,
    /// Administrative restart of the host
    Restart,
    /// The registration was removed by its owner
    Unregister,
}

pub type ExitCallback = Arc<dyn Fn(ExitReason) + Send + Sync>;

struct Registration {
    child: Child,
    callback: ExitCallback,
}

/// Callback table keyed by process id
#[derive(Clone, Default)]
pub struct ExitWatcher {
    registry: Arc<Mutex<HashMap<u32, Registration>>>,
}

impl ExitWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `child` and call `callback` when it exits
    pub fn register(&self, child: Child, callback: ExitCallback) -> u32 {
        let pid = child.id();
        debug!("Watching consumer process {}", pid);
        self.registry
            .lock()
            .insert(pid, Registration { child, callback });
        pid
    }

    /// Stop watching `pid` and hand its child back to the caller
    pub fn unregister(&self, pid: u32) -> Option<Child> {
        let registration = self.registry.lock().remove(&pid)?;
        (registration.callback)(ExitReason::Unregister);
        Some(registration.child)
    }

    pub fn is_registered(&self, pid: u32) -> bool {
        self.registry.lock().contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal a watched child
    ///
    /// The child is unreaped while registered, so its pid cannot have been
    /// recycled. Returns false when `pid` is not watched or delivery failed.
    pub fn signal(&self, pid: u32, signal: Signal) -> bool {
        let registry = self.registry.lock();
        if !registry.contains_key(&pid) {
            return false;
        }
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} to consumer {}: {}", signal, pid, e);
                false
            }
        }
    }

    /// Poll every child once and dispatch callbacks for those that exited
    ///
    /// Returns the number of callbacks invoked.
    pub fn reap_once(&self) -> usize {
        let mut fired: Vec<(ExitCallback, ExitReason)> = Vec::new();

        {
            let mut registry = self.registry.lock();
            let mut exited: Vec<(u32, ExitReason)> = Vec::new();

            for (pid, registration) in registry.iter_mut() {
                match registration.child.try_wait() {
                    Ok(Some(status)) => exited.push((*pid, ExitReason::Death(status))),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Error checking consumer {} status: {}", pid, e);
                        exited.push((*pid, ExitReason::Lost));
                    }
                }
            }

            for (pid, reason) in exited {
                if let Some(registration) = registry.remove(&pid) {
                    debug!("Consumer process {} gone: {:?}", pid, reason);
                    fired.push((registration.callback, reason));
                }
            }
        }

        let count = fired.len();
        for (callback, reason) in fired {
            callback(reason);
        }
        count
    }

    /// Deliver `reason` to every registered callback
    pub fn broadcast(&self, reason: ExitReason) {
        let callbacks: Vec<ExitCallback> = self
            .registry
            .lock()
            .values()
            .map(|r| Arc::clone(&r.callback))
            .collect();

        for callback in callbacks {
            callback(reason);
        }
    }

    /// Reap on every tick until shutdown is signalled
    pub async fn run(self, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Exit watcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.reap_once();
                }
            }
        }
    }
}
