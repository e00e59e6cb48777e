//! Core types for errlog

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Message severity, most severe first
///
/// Ordering follows urgency: `Emergency < Alert < ... < Debug`, so a message
/// passes a threshold when `severity <= threshold`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl Severity {
    /// All levels, most severe first
    pub const ALL: [Severity; 8] = [
        Severity::Emergency,
        Severity::Alert,
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Notice,
        Severity::Info,
        Severity::Debug,
    ];

    /// Syslog priority value (0-7)
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Threshold token, also used as the bracketed label in log lines
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Emergency => "emerg",
            Severity::Alert => "alert",
            Severity::Critical => "crit",
            Severity::Error => "error",
            Severity::Warning => "warn",
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Severity::Emergency),
            1 => Some(Severity::Alert),
            2 => Some(Severity::Critical),
            3 => Some(Severity::Error),
            4 => Some(Severity::Warning),
            5 => Some(Severity::Notice),
            6 => Some(Severity::Info),
            7 => Some(Severity::Debug),
            _ => None,
        }
    }

    /// Whether a message at this level passes `threshold`
    #[inline]
    pub fn within(self, threshold: Severity) -> bool {
        self <= threshold
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Severity::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidLevel(s.to_string()))
    }
}

impl TryFrom<String> for Severity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Severity> for &'static str {
    fn from(level: Severity) -> Self {
        level.as_str()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Modifier flags orthogonal to severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct LogFlags(u8);

impl LogFlags {
    pub const NONE: LogFlags = LogFlags(0);
    /// Never render the OS error segment
    pub const NO_ERRNO: LogFlags = LogFlags(1 << 0);
    /// Startup/shutdown notice: no timestamp or severity tag, bypasses stream thresholds
    pub const STARTUP: LogFlags = LogFlags(1 << 1);

    #[inline]
    pub const fn contains(self, other: LogFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for LogFlags {
    type Output = LogFlags;

    fn bitor(self, rhs: LogFlags) -> LogFlags {
        LogFlags(self.0 | rhs.0)
    }
}

/// A severity together with its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Level {
    pub severity: Severity,
    pub flags: LogFlags,
}

impl Level {
    pub const fn new(severity: Severity, flags: LogFlags) -> Self {
        Self { severity, flags }
    }

    #[inline]
    pub const fn is_startup(self) -> bool {
        self.flags.contains(LogFlags::STARTUP)
    }

    #[inline]
    pub const fn suppresses_errno(self) -> bool {
        self.flags.contains(LogFlags::NO_ERRNO)
    }
}

impl From<Severity> for Level {
    fn from(severity: Severity) -> Self {
        Level::new(severity, LogFlags::NONE)
    }
}

impl BitOr<LogFlags> for Severity {
    type Output = Level;

    fn bitor(self, rhs: LogFlags) -> Level {
        Level::new(self, rhs)
    }
}

impl BitOr<LogFlags> for Level {
    type Output = Level;

    fn bitor(self, rhs: LogFlags) -> Level {
        Level::new(self.severity, self.flags | rhs)
    }
}

/// Respawn policy for piped-log consumers
///
/// The default retries immediately and forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnPolicy {
    /// Respawns allowed inside `crash_window_secs`; 0 means unlimited
    pub max_restarts: u32,
    pub crash_window_secs: u64,
    pub restart_delay_ms: u64,
    pub kill_timeout_ms: u64,
}

impl Default for RespawnPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 0,
            crash_window_secs: DEFAULT_CRASH_WINDOW_SECS,
            restart_delay_ms: 0,
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
        }
    }
}

impl RespawnPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_restarts == 0
    }

    pub fn crash_window(&self) -> Duration {
        Duration::from_secs(self.crash_window_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Emergency < Severity::Alert);
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Info < Severity::Debug);
        assert!(Severity::Error.within(Severity::Warning));
        assert!(!Severity::Info.within(Severity::Warning));
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("emerg".parse::<Severity>().unwrap(), Severity::Emergency);
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("crit".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("warning".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_u8_matches_order() {
        for (i, level) in Severity::ALL.iter().enumerate() {
            assert_eq!(level.as_u8() as usize, i);
            assert_eq!(Severity::from_u8(i as u8), Some(*level));
        }
        assert_eq!(Severity::from_u8(8), None);
    }

    #[test]
    fn test_severity_serde() {
        let json = serde_json::to_string(&Severity::Notice).unwrap();
        assert_eq!(json, "\"notice\"");
        let level: Severity = serde_json::from_str("\"Debug\"").unwrap();
        assert_eq!(level, Severity::Debug);
        assert!(serde_json::from_str::<Severity>("\"loud\"").is_err());
    }

    #[test]
    fn test_level_flags() {
        let level = Severity::Notice | LogFlags::STARTUP;
        assert!(level.is_startup());
        assert!(!level.suppresses_errno());

        let level = level | LogFlags::NO_ERRNO;
        assert!(level.is_startup());
        assert!(level.suppresses_errno());

        let plain: Level = Severity::Error.into();
        assert!(plain.flags.is_empty());
    }

    #[test]
    fn test_respawn_policy_default() {
        let policy = RespawnPolicy::default();
        assert!(policy.is_unlimited());
        assert_eq!(policy.restart_delay(), Duration::ZERO);
        assert_eq!(policy.kill_timeout(), Duration::from_millis(DEFAULT_KILL_TIMEOUT_MS));
    }
}
