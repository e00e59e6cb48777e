//! Syslog facilities accepted in `syslog:<facility>` destinations

use errlog_core::{Error, Result, DEFAULT_SYSLOG_FACILITY};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Auth,
    AuthPriv,
    Cron,
    Daemon,
    Ftp,
    Kern,
    Lpr,
    Mail,
    News,
    Syslog,
    User,
    Uucp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

const FACILITIES: &[(&str, Facility)] = &[
    ("auth", Facility::Auth),
    ("authpriv", Facility::AuthPriv),
    ("cron", Facility::Cron),
    ("daemon", Facility::Daemon),
    ("ftp", Facility::Ftp),
    ("kern", Facility::Kern),
    ("lpr", Facility::Lpr),
    ("mail", Facility::Mail),
    ("news", Facility::News),
    ("syslog", Facility::Syslog),
    ("user", Facility::User),
    ("uucp", Facility::Uucp),
    ("local0", Facility::Local0),
    ("local1", Facility::Local1),
    ("local2", Facility::Local2),
    ("local3", Facility::Local3),
    ("local4", Facility::Local4),
    ("local5", Facility::Local5),
    ("local6", Facility::Local6),
    ("local7", Facility::Local7),
];

impl Facility {
    pub fn as_str(self) -> &'static str {
        FACILITIES
            .iter()
            .find(|(_, f)| *f == self)
            .map(|(name, _)| *name)
            .unwrap_or("user")
    }

    /// Facility used when a syslog destination names none
    pub fn default_facility() -> Self {
        DEFAULT_SYSLOG_FACILITY.parse().unwrap_or(Facility::Local7)
    }

    pub fn to_syslog(self) -> syslog::Facility {
        use syslog::Facility as S;
        match self {
            Facility::Auth => S::LOG_AUTH,
            Facility::AuthPriv => S::LOG_AUTHPRIV,
            Facility::Cron => S::LOG_CRON,
            Facility::Daemon => S::LOG_DAEMON,
            Facility::Ftp => S::LOG_FTP,
            Facility::Kern => S::LOG_KERN,
            Facility::Lpr => S::LOG_LPR,
            Facility::Mail => S::LOG_MAIL,
            Facility::News => S::LOG_NEWS,
            Facility::Syslog => S::LOG_SYSLOG,
            Facility::User => S::LOG_USER,
            Facility::Uucp => S::LOG_UUCP,
            Facility::Local0 => S::LOG_LOCAL0,
            Facility::Local1 => S::LOG_LOCAL1,
            Facility::Local2 => S::LOG_LOCAL2,
            Facility::Local3 => S::LOG_LOCAL3,
            Facility::Local4 => S::LOG_LOCAL4,
            Facility::Local5 => S::LOG_LOCAL5,
            Facility::Local6 => S::LOG_LOCAL6,
            Facility::Local7 => S::LOG_LOCAL7,
        }
    }
}

impl FromStr for Facility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FACILITIES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|(_, f)| *f)
            .ok_or_else(|| Error::UnknownFacility(s.to_string()))
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a destination string as syslog
///
/// Any string starting with `syslog` (any case) is a syslog destination.
/// `None` when the prefix is absent. A `:` after the prefix names the
/// facility; anything else after it selects the default facility.
pub fn parse_syslog_destination(dest: &str) -> Option<Result<Facility>> {
    let prefix = dest.get(..6)?;
    if !prefix.eq_ignore_ascii_case("syslog") {
        return None;
    }

    match dest[6..].strip_prefix(':') {
        Some(name) => Some(name.parse::<Facility>()),
        None => Some(Ok(Facility::default_facility())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_facility() {
        assert_eq!("local3".parse::<Facility>().unwrap(), Facility::Local3);
        assert_eq!("AUTHPRIV".parse::<Facility>().unwrap(), Facility::AuthPriv);
        assert!(matches!("local9".parse::<Facility>(), Err(Error::UnknownFacility(_))));
    }

    #[test]
    fn test_names_round_trip_through_table() {
        for (name, facility) in FACILITIES {
            assert_eq!(facility.as_str(), *name);
            assert_eq!(facility.to_string(), *name);
        }
    }

    #[test]
    fn test_default_facility() {
        assert_eq!(Facility::default_facility(), Facility::Local7);
    }

    #[test]
    fn test_syslog_destination() {
        assert_eq!(parse_syslog_destination("syslog").unwrap().unwrap(), Facility::Local7);
        assert_eq!(parse_syslog_destination("SysLog:mail").unwrap().unwrap(), Facility::Mail);
        assert!(parse_syslog_destination("syslog:bogus").unwrap().is_err());
        assert_eq!(parse_syslog_destination("syslog.txt").unwrap().unwrap(), Facility::Local7);
        assert_eq!(parse_syslog_destination("SYSLOGfoo").unwrap().unwrap(), Facility::Local7);
        assert!(parse_syslog_destination("logs/error_log").is_none());
        assert!(parse_syslog_destination("sys").is_none());
    }
}
