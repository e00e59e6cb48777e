//! Configuration file parsing for errlog
//!
//! Supports multiple configuration file formats:
//! - TOML (.toml)
//! - YAML (.yaml, .yml)
//! - JSON (.json)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::{RespawnPolicy, Severity};

/// Valid server names: alphanumerics, underscore, hyphen and dot
static SERVER_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("Invalid server name regex")
});

pub fn validate_server_name(name: &str) -> bool {
    SERVER_NAME_REGEX.is_match(name)
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(ConfigFormat::Toml),
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    /// Detect format from file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// One server (virtual host) and its error log settings
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    /// Destination string: a path, `syslog[:facility]` or `|command`
    pub error_log: Option<String>,
    /// Severity threshold; inherits the primary server's when unset
    pub log_level: Option<Severity>,
}

impl ServerConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            error_log: None,
            log_level: None,
        }
    }

    pub fn with_error_log<S: Into<String>>(mut self, error_log: S) -> Self {
        self.error_log = Some(error_log.into());
        self
    }

    pub fn with_log_level(mut self, level: Severity) -> Self {
        self.log_level = Some(level);
        self
    }
}

/// Configuration file structure (errlog.toml/yaml/json)
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Root for relative file destinations
    #[serde(default = "default_server_root")]
    pub server_root: PathBuf,
    #[serde(default = "default_ident")]
    pub ident: String,
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    /// Point stderr at the primary error log once it is open
    #[serde(default = "default_redirect_stderr")]
    pub redirect_stderr: bool,
    #[serde(default)]
    pub respawn: RespawnPolicy,
    /// First entry is the primary server
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

fn default_server_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_ident() -> String {
    DEFAULT_IDENT.to_string()
}

fn default_max_line_len() -> usize {
    MAX_LINE_LEN
}

fn default_redirect_stderr() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            server_root: default_server_root(),
            ident: default_ident(),
            max_line_len: default_max_line_len(),
            redirect_stderr: default_redirect_stderr(),
            respawn: RespawnPolicy::default(),
            servers: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Load config from file, automatically detecting format from extension
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            Error::Configuration(format!(
                "Unsupported config file extension: {}. Expected .toml, .yaml, .yml, or .json",
                path.display()
            ))
        })?;

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }

    /// Parse config content with specified format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: LogConfig = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        config.normalized()
    }

    /// Find and load the first config file present in `dir`
    pub fn find_and_load(dir: &Path) -> Result<(Self, PathBuf)> {
        for name in CONFIG_FILES {
            let path = dir.join(name);
            if path.exists() {
                let config = Self::load(&path)?;
                return Ok((config, path));
            }
        }
        Err(Error::Configuration(format!(
            "No config file found in {}. Expected one of: {:?}",
            dir.display(),
            CONFIG_FILES
        )))
    }

    /// Validate and fill in defaults for the primary server
    pub fn normalized(mut self) -> Result<Self> {
        if self.servers.is_empty() {
            self.servers.push(ServerConfig::new("main"));
        }

        for server in &self.servers {
            if !validate_server_name(&server.name) {
                return Err(Error::InvalidServerName(server.name.clone()));
            }
            if matches!(server.error_log.as_deref(), Some(s) if s.trim().is_empty()) {
                return Err(Error::config(format!(
                    "Empty error_log for server {}",
                    server.name
                )));
            }
        }

        let eol = LINE_TERMINATOR.len();
        if self.max_line_len <= eol {
            return Err(Error::config(format!(
                "max_line_len must exceed {} bytes",
                eol
            )));
        }

        let primary = &mut self.servers[0];
        if primary.error_log.is_none() {
            primary.error_log = Some(DEFAULT_ERROR_LOG.to_string());
        }
        if primary.log_level.is_none() {
            primary.log_level = Some(DEFAULT_LOG_LEVEL);
        }

        Ok(self)
    }

    /// Threshold of the primary server
    pub fn primary_level(&self) -> Severity {
        self.servers
            .first()
            .and_then(|s| s.log_level)
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }
}
