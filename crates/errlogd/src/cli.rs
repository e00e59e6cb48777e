//! CLI argument definitions

use clap::{Parser, Subcommand};
use errlog_core::Severity;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "errlogd")]
#[command(version, about = "Error log daemon with file, syslog and piped destinations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (searched in the current directory, then the errlog home, when omitted)
    #[arg(short, long, env = "ERRLOG_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Severity of lines forwarded from stdin
    #[arg(short, long, default_value = "error", global = true)]
    pub level: Severity,

    /// Also point stderr at the primary error log
    #[arg(long, global = true)]
    pub log_stderr: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open the logs and forward stdin lines to the primary error log (default)
    Run,

    /// Open every configured error log, report the result and exit
    TestConfig,
}
