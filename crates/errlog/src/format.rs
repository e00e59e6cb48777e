//! Bounded single-line message formatting

use chrono::{DateTime, Local};
use errlog_core::{Level, Severity, LINE_TERMINATOR};
use std::fmt::{self, Write};
use std::io;

use crate::gate::SinkKind;

/// Source location of a log call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

impl Location {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

/// Everything that goes into one log line
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub location: Option<Location>,
    pub level: Level,
    pub status: Option<&'a io::Error>,
    pub client: Option<&'a str>,
    pub referer: Option<&'a str>,
    pub args: fmt::Arguments<'a>,
}

/// ctime-style timestamp: `Wed Jun 30 21:49:08 1993`
pub fn ctime(now: &DateTime<Local>) -> String {
    now.format("%a %b %d %H:%M:%S %Y").to_string()
}

/// OS error text without std's "(os error N)" suffix
fn os_error_text(err: &io::Error) -> String {
    let text = err.to_string();
    match text.rfind(" (os error ") {
        Some(pos) => text[..pos].to_string(),
        None => text,
    }
}

/// String buffer that silently stops accepting input at `cap` bytes
struct Bounded {
    buf: String,
    cap: usize,
    full: bool,
}

impl Bounded {
    fn new(cap: usize) -> Self {
        Self {
            buf: String::with_capacity(cap.min(1024)),
            cap,
            full: false,
        }
    }
}

impl fmt::Write for Bounded {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.full {
            return Ok(());
        }

        let room = self.cap - self.buf.len();
        if s.len() <= room {
            self.buf.push_str(s);
            return Ok(());
        }

        let mut end = room;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&s[..end]);
        self.full = true;
        Ok(())
    }
}

/// Render `record` as one line no longer than `max_len` bytes
///
/// Stream lines always end with the line terminator, even when the message
/// had to be truncated. Syslog lines carry no terminator, timestamp or
/// severity tag.
pub fn format_line(record: &Record<'_>, sink: SinkKind, max_len: usize, now: &DateTime<Local>) -> String {
    let stream = sink == SinkKind::Stream;
    let eol = if stream { LINE_TERMINATOR } else { "" };
    let mut out = Bounded::new(max_len.saturating_sub(eol.len()));

    // Writes into Bounded never fail.
    let _ = write_segments(&mut out, record, stream, now);

    let mut line = out.buf;
    line.push_str(eol);
    line
}

fn write_segments(out: &mut Bounded, record: &Record<'_>, stream: bool, now: &DateTime<Local>) -> fmt::Result {
    let level = record.level;

    if stream && !level.is_startup() {
        write!(out, "[{}] [{}] ", ctime(now), level.severity)?;
    }

    if level.severity == Severity::Debug {
        if let Some(loc) = record.location {
            write!(out, "{}({}): ", loc.file, loc.line)?;
        }
    }

    if let Some(client) = record.client {
        write!(out, "[client {}] ", client)?;
    }

    if !level.suppresses_errno() {
        if let Some(err) = record.status {
            match err.raw_os_error() {
                Some(code) => write!(out, "({}){}: ", code, os_error_text(err))?,
                None => write!(out, "{}: ", err)?,
            }
        }
    }

    out.write_fmt(record.args)?;

    if let Some(referer) = record.referer {
        write!(out, ", referer: {}", referer)?;
    }

    Ok(())
}
