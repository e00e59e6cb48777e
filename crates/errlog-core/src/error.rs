//! Error types for errlog

use std::path::PathBuf;

/// errlog error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Could not open error log {path}: {source}")]
    OpenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't start piped log process '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Unknown syslog facility: {0}")]
    UnknownFacility(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Result type alias for errlog
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn spawn<P: Into<String>, R: ToString>(program: P, reason: R) -> Self {
        Error::Spawn {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    /// Raw OS error code carried by this error, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::OpenLog { source, .. } => source.raw_os_error(),
            Error::IoError(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
