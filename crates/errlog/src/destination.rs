//! Resolved log destinations

use errlog_core::{Error, Result, Severity};
use errlog_runtime::PipedLog;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::facility::Facility;
use crate::gate::SinkKind;

/// Receiver of syslog messages
pub trait SyslogSink: Send + Sync {
    fn send(&self, severity: Severity, message: &str) -> io::Result<()>;

    /// Disconnect; later sends may fail
    fn close(&self) {}
}

/// Opens syslog connections for `syslog[:facility]` destinations
pub trait SyslogConnector: Send + Sync {
    fn connect(&self, facility: Facility, ident: &str) -> Result<Arc<dyn SyslogSink>>;
}

type UnixLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

/// Syslog over the local unix socket
pub struct UnixSyslog {
    logger: Mutex<Option<UnixLogger>>,
}

impl SyslogSink for UnixSyslog {
    fn send(&self, severity: Severity, message: &str) -> io::Result<()> {
        let mut guard = self.logger.lock();
        let logger = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "syslog closed"))?;

        let sent = match severity {
            Severity::Emergency => logger.emerg(message),
            Severity::Alert => logger.alert(message),
            Severity::Critical => logger.crit(message),
            Severity::Error => logger.err(message),
            Severity::Warning => logger.warning(message),
            Severity::Notice => logger.notice(message),
            Severity::Info => logger.info(message),
            Severity::Debug => logger.debug(message),
        };
        sent.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    fn close(&self) {
        self.logger.lock().take();
    }
}

/// Connects [`UnixSyslog`] sinks
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSyslogConnector;

impl SyslogConnector for UnixSyslogConnector {
    fn connect(&self, facility: Facility, ident: &str) -> Result<Arc<dyn SyslogSink>> {
        let formatter = syslog::Formatter3164 {
            facility: facility.to_syslog(),
            hostname: None,
            process: ident.to_string(),
            pid: std::process::id(),
        };

        let logger = syslog::unix(formatter)
            .map_err(|e| Error::config(format!("Unable to connect to syslog ({}): {}", facility, e)))?;

        Ok(Arc::new(UnixSyslog {
            logger: Mutex::new(Some(logger)),
        }))
    }
}

/// An error log file opened for append
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: RwLock<Option<File>>,
}

impl LogFile {
    /// Open for append/read/write, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|source| Error::OpenLog {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let guard = self.file.read();
        match guard.as_ref() {
            Some(mut file) => {
                file.write_all(line)?;
                file.flush()
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "log file closed")),
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.file.read().as_ref().map(|f| f.as_raw_fd())
    }

    fn close(&self) {
        self.file.write().take();
    }
}

/// Where formatted lines go
pub enum Destination {
    File(LogFile),
    Syslog {
        facility: Facility,
        sink: Arc<dyn SyslogSink>,
    },
    Pipe(PipedLog),
    /// The process's standard error
    Stderr,
}

impl Destination {
    pub fn sink_kind(&self) -> SinkKind {
        match self {
            Destination::Syslog { .. } => SinkKind::Syslog,
            _ => SinkKind::Stream,
        }
    }

    /// Hand one complete line to the sink in a single write
    pub fn write(&self, severity: Severity, line: &str) -> io::Result<()> {
        match self {
            Destination::File(file) => file.write_line(line.as_bytes()),
            Destination::Syslog { sink, .. } => sink.send(severity, line),
            Destination::Pipe(pipe) => pipe.write_line(line.as_bytes()),
            Destination::Stderr => {
                let mut stderr = io::stderr().lock();
                stderr.write_all(line.as_bytes())?;
                stderr.flush()
            }
        }
    }

    /// Descriptor lines are written to, for stderr redirection
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Destination::File(file) => file.raw_fd(),
            Destination::Pipe(pipe) => pipe.write_fd(),
            Destination::Syslog { .. } | Destination::Stderr => None,
        }
    }

    /// Release the underlying handle
    ///
    /// Pipes are released by their own scope registration.
    pub fn close(&self) {
        match self {
            Destination::File(file) => file.close(),
            Destination::Syslog { sink, .. } => sink.close(),
            Destination::Pipe(_) | Destination::Stderr => {}
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Destination::File(file) => file.path().display().to_string(),
            Destination::Syslog { facility, .. } => format!("syslog:{}", facility),
            Destination::Pipe(pipe) => format!("|{}", pipe.command()),
            Destination::Stderr => "stderr".to_string(),
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Destination").field(&self.describe()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("error_log");
        std::fs::write(&path, "existing\n").unwrap();

        let dest = Destination::File(LogFile::open(&path).unwrap());
        dest.write(Severity::Error, "one\n").unwrap();
        dest.write(Severity::Error, "two\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing\none\ntwo\n");
        assert_eq!(dest.sink_kind(), SinkKind::Stream);
        assert!(dest.raw_fd().is_some());
    }

    #[test]
    fn test_log_file_open_failure() {
        let err = LogFile::open(Path::new("/nonexistent/dir/error_log")).unwrap_err();
        assert!(matches!(err, Error::OpenLog { .. }));
        assert_eq!(err.raw_os_error(), Some(2));
    }

    #[test]
    fn test_closed_file_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let dest = Destination::File(LogFile::open(&dir.path().join("error_log")).unwrap());
        dest.close();
        assert!(dest.write(Severity::Error, "late\n").is_err());
        assert!(dest.raw_fd().is_none());
    }

    #[test]
    fn test_describe() {
        assert_eq!(Destination::Stderr.describe(), "stderr");
        assert_eq!(Destination::Stderr.sink_kind(), SinkKind::Stream);
        assert!(Destination::Stderr.raw_fd().is_none());
    }
}
