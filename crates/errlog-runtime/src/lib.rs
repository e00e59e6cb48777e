//! errlog Runtime - Supervision of piped-log consumer processes

pub mod cmd;
pub mod piped;
pub mod scope;
pub mod watcher;

pub use piped::{PipeState, PipedLog};
pub use scope::{CleanupHandle, ExecFn, ResourceScope, WeakScope};
pub use watcher::{ExitCallback, ExitReason, ExitWatcher};
