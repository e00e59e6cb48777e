//! Public logging entry points
//!
//! The four entry points differ only in the context that supplies the
//! destination, the threshold and the optional client/referer segments.
//! None of them report failure: a line that cannot be written is dropped.

use chrono::Local;
use errlog_core::{Level, LogFlags, Severity, DEFAULT_LOG_LEVEL, ERROR_NOTES, MAX_LINE_LEN};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

use crate::destination::Destination;
use crate::format::{ctime, format_line, Location, Record};
use crate::gate;
use crate::resolver::ServerLog;

/// A client connection served by one server
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub remote_ip: String,
    pub server: Arc<ServerLog>,
}

impl ConnectionContext {
    pub fn new<S: Into<String>>(remote_ip: S, server: Arc<ServerLog>) -> Self {
        Self {
            remote_ip: remote_ip.into(),
            server,
        }
    }
}

/// One request on a connection
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub connection: Arc<ConnectionContext>,
    /// Request headers in arrival order
    pub headers_in: Vec<(String, String)>,
    /// Per-request annotations read by error-document handlers
    pub notes: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(connection: Arc<ConnectionContext>) -> Self {
        Self {
            connection,
            headers_in: Vec::new(),
            notes: HashMap::new(),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers_in.push((name.into(), value.into()));
        self
    }

    /// First header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers_in
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn error_notes(&self) -> Option<&str> {
        self.notes.get(ERROR_NOTES).map(String::as_str)
    }
}

struct Target<'a> {
    destination: &'a Destination,
    threshold: Severity,
    max_line_len: usize,
}

impl<'a> Target<'a> {
    fn of(server: &'a ServerLog) -> Self {
        Self {
            destination: server.destination(),
            threshold: server.threshold(),
            max_line_len: server.max_line_len(),
        }
    }
}

fn log_core(target: Target<'_>, record: Record<'_>) {
    let sink = target.destination.sink_kind();
    if !gate::admits(record.level, target.threshold, sink) {
        return;
    }

    let line = format_line(&record, sink, target.max_line_len, &Local::now());
    if let Err(e) = target.destination.write(record.level.severity, &line) {
        trace!("Dropped log line for {}: {}", target.destination.describe(), e);
    }
}

/// Log without any server context, to standard error
///
/// Used before servers are configured; the default threshold applies.
pub fn log_perror(location: Option<Location>, level: Level, status: Option<&io::Error>, args: fmt::Arguments<'_>) {
    let stderr = Destination::Stderr;
    let target = Target {
        destination: &stderr,
        threshold: DEFAULT_LOG_LEVEL,
        max_line_len: MAX_LINE_LEN,
    };
    log_core(
        target,
        Record {
            location,
            level,
            status,
            client: None,
            referer: None,
            args,
        },
    );
}

/// Log to a server's error log; `None` behaves like [`log_perror`]
pub fn log_error(
    server: Option<&ServerLog>,
    location: Option<Location>,
    level: Level,
    status: Option<&io::Error>,
    args: fmt::Arguments<'_>,
) {
    let server = match server {
        Some(server) => server,
        None => return log_perror(location, level, status, args),
    };

    log_core(
        Target::of(server),
        Record {
            location,
            level,
            status,
            client: None,
            referer: None,
            args,
        },
    );
}

/// Log on behalf of a connection, tagging the client address
pub fn log_cerror(
    conn: &ConnectionContext,
    location: Option<Location>,
    level: Level,
    status: Option<&io::Error>,
    args: fmt::Arguments<'_>,
) {
    log_core(
        Target::of(&conn.server),
        Record {
            location,
            level,
            status,
            client: Some(&conn.remote_ip),
            referer: None,
            args,
        },
    );
}

/// Log on behalf of a request
///
/// Adds the client address and `Referer` header. A warning or worse also
/// becomes the request's `error-notes`, HTML-escaped, unless a note is
/// already present.
pub fn log_rerror(
    req: &mut RequestContext,
    location: Option<Location>,
    level: Level,
    status: Option<&io::Error>,
    args: fmt::Arguments<'_>,
) {
    log_core(
        Target::of(&req.connection.server),
        Record {
            location,
            level,
            status,
            client: Some(&req.connection.remote_ip),
            referer: req.header("Referer"),
            args,
        },
    );

    if level.severity.within(Severity::Warning) && !req.notes.contains_key(ERROR_NOTES) {
        req.notes.insert(ERROR_NOTES.to_string(), escape_html(&args.to_string()));
    }
}

/// Report a failed assertion on standard error and abort
pub fn log_assert(expr: &str, file: &str, line: u32) -> ! {
    log_error(
        None,
        None,
        Severity::Emergency | LogFlags::STARTUP | LogFlags::NO_ERRNO,
        None,
        format_args!(
            "[{}] file {}, line {}, assertion \"{}\" failed",
            ctime(&Local::now()),
            file,
            line,
            expr
        ),
    );
    std::process::abort()
}

/// Escape `&`, `<`, `>` and `"` for inclusion in an HTML page
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
