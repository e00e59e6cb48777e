//! Constants and default values for errlog

use std::path::PathBuf;

use crate::types::Severity;

/// Config directory name under the user's config dir
pub const ERRLOG_DIR: &str = "errlog";

/// Default config file names to search for (in priority order)
pub const CONFIG_FILES: &[&str] = &[
    "errlog.toml",
    "errlog.yaml",
    "errlog.yml",
    "errlog.json",
];

/// Error log of the primary server when none is configured
pub const DEFAULT_ERROR_LOG: &str = "logs/error_log";

/// Threshold applied to messages logged without a server context
pub const DEFAULT_LOG_LEVEL: Severity = Severity::Warning;

/// Syslog facility used for a bare `syslog` destination
pub const DEFAULT_SYSLOG_FACILITY: &str = "local7";

/// Identity passed to syslog when none is configured
pub const DEFAULT_IDENT: &str = "errlogd";

/// Maximum length of one formatted log line, terminator included
pub const MAX_LINE_LEN: usize = 8192;

/// Line terminator appended to every formatted line
#[cfg(windows)]
pub const LINE_TERMINATOR: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_TERMINATOR: &str = "\n";

/// Request note that receives the first warning-or-worse message
pub const ERROR_NOTES: &str = "error-notes";

/// Grace period between SIGTERM and SIGKILL for a consumer being torn down
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 3000;

/// Default crash window in seconds (for respawn caps)
pub const DEFAULT_CRASH_WINDOW_SECS: u64 = 60;

/// How often the exit watcher polls registered children
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 200;

/// Get the errlog config directory
pub fn errlog_home() -> PathBuf {
    dirs::config_dir()
        .map(|h| h.join(ERRLOG_DIR))
        .unwrap_or_else(|| PathBuf::from(ERRLOG_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errlog_home() {
        let home = errlog_home();
        assert!(home.to_string_lossy().contains("errlog"));
    }

    #[test]
    fn test_terminator_fits_line() {
        assert!(LINE_TERMINATOR.len() < MAX_LINE_LEN);
    }
}
