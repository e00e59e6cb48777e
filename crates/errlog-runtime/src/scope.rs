//! Scoped resource release
//!
//! A [`ResourceScope`] owns release callbacks for files, pipes and consumer
//! processes. Every callback runs exactly once, in reverse registration
//! order, when the scope is released (explicitly or by dropping the last
//! handle). A second list of exec callbacks closes inherited descriptors in a
//! child about to exec another program, without releasing anything.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Callback run in a child process right before it execs another program
pub type ExecFn = Arc<dyn Fn() + Send + Sync>;

struct Cleanup {
    id: u64,
    label: String,
    on_release: ReleaseFn,
    on_exec: Option<ExecFn>,
}

struct ScopeInner {
    name: String,
    cleanups: Mutex<Vec<Cleanup>>,
    next_id: AtomicU64,
    released: AtomicBool,
}

impl ScopeInner {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<Cleanup> = std::mem::take(&mut *self.cleanups.lock());
        debug!("Releasing scope {} ({} cleanups)", self.name, drained.len());

        for cleanup in drained.into_iter().rev() {
            debug!("Running cleanup {} in scope {}", cleanup.label, self.name);
            (cleanup.on_release)();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handle to a registered cleanup, used to run or cancel it early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle(u64);

/// Owning scope for log resources
#[derive(Clone)]
pub struct ResourceScope {
    inner: Arc<ScopeInner>,
}

/// Non-owning reference to a [`ResourceScope`]
#[derive(Clone)]
pub struct WeakScope {
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    pub fn upgrade(&self) -> Option<ResourceScope> {
        self.inner.upgrade().map(|inner| ResourceScope { inner })
    }
}

impl ResourceScope {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                cleanups: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a release callback and an optional exec callback
    ///
    /// Registering on an already released scope runs `on_release` at once.
    pub fn register<F>(&self, label: &str, on_release: F, on_exec: Option<ExecFn>) -> CleanupHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut cleanups = self.inner.cleanups.lock();
            if !self.inner.released.load(Ordering::SeqCst) {
                cleanups.push(Cleanup {
                    id,
                    label: label.to_string(),
                    on_release: Box::new(on_release),
                    on_exec,
                });
                return CleanupHandle(id);
            }
        }

        debug!("Scope {} already released, running {} now", self.inner.name, label);
        on_release();
        CleanupHandle(id)
    }

    /// Register a release-only callback
    pub fn on_release<F>(&self, label: &str, on_release: F) -> CleanupHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.register(label, on_release, None)
    }

    /// Remove a cleanup without running it
    pub fn kill(&self, handle: CleanupHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Remove a cleanup and run it now
    pub fn run(&self, handle: CleanupHandle) -> bool {
        match self.take(handle) {
            Some(cleanup) => {
                (cleanup.on_release)();
                true
            }
            None => false,
        }
    }

    fn take(&self, handle: CleanupHandle) -> Option<Cleanup> {
        let mut cleanups = self.inner.cleanups.lock();
        let pos = cleanups.iter().position(|c| c.id == handle.0)?;
        Some(cleanups.remove(pos))
    }

    /// Snapshot of the exec callbacks currently registered
    pub fn exec_cleanups(&self) -> Vec<ExecFn> {
        self.inner
            .cleanups
            .lock()
            .iter()
            .filter_map(|c| c.on_exec.clone())
            .collect()
    }

    /// Run every exec callback; only meaningful in a child about to exec
    pub fn run_exec_cleanups(&self) {
        for cleanup in self.exec_cleanups() {
            cleanup();
        }
    }

    /// Run every release callback once; later calls do nothing
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.cleanups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceScope")
            .field("name", &self.inner.name)
            .field("cleanups", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}
