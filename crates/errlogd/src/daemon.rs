//! Main daemon orchestration

use anyhow::{Context, Result};
use errlog::{log_error, ErrorLogs, LogFlags, ServerLog, Severity, UnixSyslogConnector};
use errlog_core::{constants, LogConfig, DEFAULT_REAP_INTERVAL_MS};
use errlog_runtime::{ExitWatcher, ResourceScope};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Locate and load the configuration
///
/// An explicit path must exist. Otherwise the current directory and then the
/// errlog home are searched, falling back to built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<(LogConfig, Option<PathBuf>)> {
    if let Some(path) = path {
        let config = LogConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
        return Ok((config, Some(path.to_path_buf())));
    }

    for dir in [std::env::current_dir()?, constants::errlog_home()] {
        if let Ok((config, found)) = LogConfig::find_and_load(&dir) {
            info!("Loaded config from {}", found.display());
            return Ok((config, Some(found)));
        }
    }

    info!("No config file found, using defaults");
    Ok((LogConfig::default().normalized()?, None))
}

/// The open error logs of one configuration generation
struct Generation {
    logs: ErrorLogs,
    scope: ResourceScope,
}

/// Main daemon struct
pub struct Daemon {
    config_path: Option<PathBuf>,
    config: LogConfig,
    log_stderr: bool,
    forward_level: Severity,
    watcher: ExitWatcher,
    current: Generation,
    generation: u32,
}

impl Daemon {
    /// Open every configured error log; any failure is fatal
    pub fn open(config: LogConfig, config_path: Option<PathBuf>, log_stderr: bool, forward_level: Severity) -> Result<Self> {
        let watcher = ExitWatcher::new();
        let current = Self::open_generation(&config, &watcher, log_stderr, 0)?;

        Ok(Self {
            config_path,
            config,
            log_stderr,
            forward_level,
            watcher,
            current,
            generation: 0,
        })
    }

    fn open_generation(config: &LogConfig, watcher: &ExitWatcher, log_stderr: bool, generation: u32) -> Result<Generation> {
        let scope = ResourceScope::new(format!("error-logs-{}", generation));
        let logs = ErrorLogs::open(config, &scope, watcher, &UnixSyslogConnector)?;

        if log_stderr {
            logs.error_log_to_stderr(logs.main())?;
        }

        for server in logs.servers() {
            info!(
                "Server {} logs to {} at {}",
                server.name(),
                server.destination().describe(),
                server.threshold()
            );
        }
        Ok(Generation { logs, scope })
    }

    pub fn logs(&self) -> &ErrorLogs {
        &self.current.logs
    }

    fn main_log(&self) -> &ServerLog {
        self.current.logs.main()
    }

    /// Run until stdin closes or a termination signal arrives
    pub async fn run(mut self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let reaper = tokio::spawn(
            self.watcher
                .clone()
                .run(Duration::from_millis(DEFAULT_REAP_INTERVAL_MS), shutdown_tx.subscribe()),
        );

        log_error!(
            Some(self.main_log()),
            Severity::Notice | LogFlags::STARTUP,
            None,
            "errlogd configured -- resuming normal operations"
        );

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        let reason = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.forward(&line),
                    Ok(None) => break "end of input",
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break "unreadable input";
                    }
                },
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reopening error logs");
                    if let Err(e) = self.reopen() {
                        error!("Reopen failed, keeping previous logs: {:#}", e);
                    }
                }
                _ = sigterm.recv() => break "caught SIGTERM",
                _ = sigint.recv() => break "caught SIGINT",
            }
        };

        log_error!(
            Some(self.main_log()),
            Severity::Notice | LogFlags::STARTUP,
            None,
            "{}, shutting down",
            reason
        );
        info!("Shutting down: {}", reason);

        let _ = shutdown_tx.send(());
        let _ = reaper.await;
        self.current.scope.release();

        info!("Daemon shutdown complete");
        Ok(())
    }

    fn forward(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        log_error!(Some(self.main_log()), self.forward_level, None, "{}", line);
    }

    /// Stop piped consumers, close every log and open them again
    ///
    /// The configuration file is read again when there is one. If the new
    /// generation cannot be opened the previous one stays in place.
    fn reopen(&mut self) -> Result<()> {
        let config = match &self.config_path {
            Some(path) => LogConfig::load(path).with_context(|| format!("Failed to reload {}", path.display()))?,
            None => self.config.clone(),
        };

        log_error!(
            Some(self.main_log()),
            Severity::Notice | LogFlags::STARTUP,
            None,
            "SIGHUP received.  Attempting to restart"
        );

        self.current.logs.restart_piped();
        self.current.scope.release();

        let next = self.generation + 1;
        let opened = Self::open_generation(&config, &self.watcher, self.log_stderr, next);
        let generation = match opened {
            Ok(generation) => generation,
            Err(e) => {
                // The old handles are gone; reopen them as they were.
                let previous = Self::open_generation(&self.config, &self.watcher, self.log_stderr, next)?;
                self.current = previous;
                self.generation = next;
                return Err(e);
            }
        };

        self.current = generation;
        self.config = config;
        self.generation = next;

        log_error!(
            Some(self.main_log()),
            Severity::Notice | LogFlags::STARTUP,
            None,
            "errlogd configured -- resuming normal operations"
        );
        Ok(())
    }
}
