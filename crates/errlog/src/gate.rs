//! Severity gate, consulted before any formatting or I/O

use errlog_core::{Level, Severity};

/// What kind of sink a message is headed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Files, pipes and stderr: lines carry their own timestamp
    Stream,
    /// Syslog supplies timestamp and priority itself
    Syslog,
}

/// Whether a message at `level` is emitted under `threshold`
///
/// Startup notices pass on stream sinks regardless of the threshold; syslog
/// compares them like any other message.
#[inline]
pub fn admits(level: Level, threshold: Severity, sink: SinkKind) -> bool {
    if level.severity.within(threshold) {
        return true;
    }
    level.is_startup() && sink == SinkKind::Stream
}
