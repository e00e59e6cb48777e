//! Destination resolution for the primary and virtual-host servers
//!
//! Every distinct destination string maps to exactly one open handle. A
//! secondary server with no destination of its own, or with a string some
//! earlier server already resolved, shares that server's [`Destination`].

use errlog_core::{Error, Level, LogConfig, Result, Severity, DEFAULT_LOG_LEVEL};
use errlog_runtime::{ExitReason, ExitWatcher, PipedLog, ResourceScope};
use nix::unistd::dup2;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::destination::{Destination, LogFile, SyslogConnector};
use crate::entry;
use crate::facility::parse_syslog_destination;

/// Error-log settings of one server
#[derive(Debug)]
pub struct ServerLog {
    name: String,
    configured: Option<String>,
    threshold: Severity,
    destination: Arc<Destination>,
    /// Whether this server opened the destination rather than sharing it
    owned: bool,
    max_line_len: usize,
}

impl ServerLog {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination string from the configuration, if the server had one
    pub fn configured(&self) -> Option<&str> {
        self.configured.as_deref()
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn destination(&self) -> &Arc<Destination> {
        &self.destination
    }

    pub fn owns_destination(&self) -> bool {
        self.owned
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Whether two servers write through the same handle
    pub fn shares_destination(&self, other: &ServerLog) -> bool {
        Arc::ptr_eq(&self.destination, &other.destination)
    }
}

/// The resolved error logs of a host: primary first, then virtual hosts
pub struct ErrorLogs {
    servers: Vec<Arc<ServerLog>>,
    scope: ResourceScope,
    watcher: ExitWatcher,
}

struct Opener<'a> {
    config: &'a LogConfig,
    scope: &'a ResourceScope,
    watcher: &'a ExitWatcher,
    syslog: &'a dyn SyslogConnector,
}

impl Opener<'_> {
    fn open(&self, dest: &str) -> Result<Destination> {
        if let Some(command) = dest.strip_prefix('|') {
            let pipe = PipedLog::open(self.scope, self.watcher, command, self.config.respawn.clone())?;
            return Ok(Destination::Pipe(pipe));
        }

        if let Some(facility) = parse_syslog_destination(dest) {
            let facility = facility?;
            let sink = self.syslog.connect(facility, &self.config.ident)?;
            return Ok(Destination::Syslog { facility, sink });
        }

        let path = self.config.server_root.join(Path::new(dest));
        Ok(Destination::File(LogFile::open(&path)?))
    }

    fn open_shared(&self, dest: &str) -> Result<Arc<Destination>> {
        let destination = Arc::new(self.open(dest)?);
        debug!("Opened error log {}", destination.describe());

        if !matches!(*destination, Destination::Pipe(_)) {
            let held = Arc::clone(&destination);
            self.scope.on_release("error log", move || held.close());
        }
        Ok(destination)
    }
}

impl ErrorLogs {
    /// Open every configured error log, tying the handles to `scope`
    ///
    /// Any destination that cannot be opened or spawned fails the whole call.
    pub fn open(
        config: &LogConfig,
        scope: &ResourceScope,
        watcher: &ExitWatcher,
        syslog: &dyn SyslogConnector,
    ) -> Result<Self> {
        let (primary, secondaries) = config
            .servers
            .split_first()
            .ok_or_else(|| Error::config("No servers configured"))?;

        let opener = Opener {
            config,
            scope,
            watcher,
            syslog,
        };

        let primary_dest = primary
            .error_log
            .clone()
            .ok_or_else(|| Error::config(format!("No error_log for server {}", primary.name)))?;
        let primary_level = primary.log_level.unwrap_or(DEFAULT_LOG_LEVEL);

        let main = Arc::new(ServerLog {
            name: primary.name.clone(),
            configured: Some(primary_dest.clone()),
            threshold: primary_level,
            destination: opener.open_shared(&primary_dest)?,
            owned: true,
            max_line_len: config.max_line_len,
        });

        if config.redirect_stderr {
            if let Err(e) = redirect_stderr(&main.destination) {
                entry::log_error(
                    Some(main.as_ref()),
                    None,
                    Level::from(Severity::Critical),
                    Some(&e),
                    format_args!("unable to replace stderr with error log {}", primary_dest),
                );
            }
        }

        let mut servers = vec![main];
        for server in secondaries {
            let threshold = server.log_level.unwrap_or(primary_level);
            let (destination, owned) = match server.error_log.as_deref() {
                None => (Arc::clone(&servers[0].destination), false),
                Some(dest) => {
                    let existing = servers
                        .iter()
                        .find(|s| s.configured.as_deref() == Some(dest))
                        .map(|s| Arc::clone(&s.destination));
                    match existing {
                        Some(shared) => (shared, false),
                        None => (opener.open_shared(dest)?, true),
                    }
                }
            };

            servers.push(Arc::new(ServerLog {
                name: server.name.clone(),
                configured: server.error_log.clone(),
                threshold,
                destination,
                owned,
                max_line_len: config.max_line_len,
            }));
        }

        let logs = Self {
            servers,
            scope: scope.clone(),
            watcher: watcher.clone(),
        };
        info!(
            "Opened {} error log(s) for {} server(s)",
            logs.distinct_destinations(),
            logs.servers.len()
        );
        Ok(logs)
    }

    /// The primary server
    pub fn main(&self) -> &Arc<ServerLog> {
        &self.servers[0]
    }

    pub fn server(&self, name: &str) -> Option<&Arc<ServerLog>> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn servers(&self) -> &[Arc<ServerLog>] {
        &self.servers
    }

    /// Number of distinct open handles
    pub fn distinct_destinations(&self) -> usize {
        let mut seen: Vec<&Arc<Destination>> = Vec::new();
        for server in &self.servers {
            if !seen.iter().any(|d| Arc::ptr_eq(d, &server.destination)) {
                seen.push(&server.destination);
            }
        }
        seen.len()
    }

    /// Piped-log destinations, one per distinct consumer
    pub fn pipes(&self) -> Vec<PipedLog> {
        let mut pipes: Vec<PipedLog> = Vec::new();
        for server in &self.servers {
            if let Destination::Pipe(pipe) = &*server.destination {
                if !pipes.iter().any(|p| p.ptr_eq(pipe)) {
                    pipes.push(pipe.clone());
                }
            }
        }
        pipes
    }

    /// Ask every piped consumer to exit without being respawned
    pub fn restart_piped(&self) {
        self.watcher.broadcast(ExitReason::Restart);
    }

    /// Point standard error at `server`'s error log
    pub fn error_log_to_stderr(&self, server: &ServerLog) -> Result<()> {
        redirect_stderr(&server.destination).map_err(Error::from)
    }

    /// Close every handle opened by this resolution
    pub fn close(&self) {
        self.scope.release();
    }
}

impl std::fmt::Debug for ErrorLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLogs")
            .field("servers", &self.servers)
            .field("scope", &self.scope.name())
            .finish()
    }
}

/// Make fd 2 refer to the destination, or to /dev/null when it has no descriptor
fn redirect_stderr(destination: &Destination) -> io::Result<()> {
    match destination.raw_fd() {
        Some(fd) => dup_onto_stderr(fd),
        None => {
            let null = OpenOptions::new().write(true).open("/dev/null")?;
            dup_onto_stderr(null.as_raw_fd())
        }
    }
}

fn dup_onto_stderr(fd: RawFd) -> io::Result<()> {
    dup2(fd, io::stderr().as_raw_fd())?;
    Ok(())
}
