//! errlog - Severity-gated error logging for a multi-server host
//!
//! Messages are gated by a per-server threshold, formatted into a single
//! bounded line and written to a file, to syslog, or to a supervised piped
//! consumer process.

#[macro_use]
mod macros;

pub mod destination;
pub mod entry;
pub mod facility;
pub mod format;
pub mod gate;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use destination::{Destination, LogFile, SyslogConnector, SyslogSink, UnixSyslog, UnixSyslogConnector};
pub use entry::{
    escape_html, log_assert, log_cerror, log_error, log_perror, log_rerror, ConnectionContext, RequestContext,
};
pub use errlog_core::{Level, LogFlags, Severity};
pub use facility::Facility;
pub use format::{format_line, Location, Record};
pub use gate::{admits, SinkKind};
pub use resolver::{ErrorLogs, ServerLog};
