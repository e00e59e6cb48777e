//! errlogd - hosts the error log core and supervises piped consumers

use anyhow::Result;
use clap::Parser;
use errlog::{ErrorLogs, UnixSyslogConnector};
use errlog_runtime::{ExitWatcher, ResourceScope};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod daemon;

use cli::{Cli, Commands};
use daemon::Daemon;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "errlogd=info,errlog=info,errlog_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::TestConfig) => test_config(&cli),
        Some(Commands::Run) | None => run(&cli).await,
    };

    if let Err(e) = result {
        eprintln!("errlogd: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    info!("errlogd starting...");

    let (config, path) = daemon::load_config(cli.config.as_deref())?;
    let daemon = Daemon::open(config, path, cli.log_stderr, cli.level)?;
    info!("Opened {} distinct error log(s)", daemon.logs().distinct_destinations());

    daemon.run().await
}

fn test_config(cli: &Cli) -> Result<()> {
    let (config, path) = daemon::load_config(cli.config.as_deref())?;

    let scope = ResourceScope::new("test-config");
    let logs = ErrorLogs::open(
        &errlog_core::LogConfig {
            redirect_stderr: false,
            ..config
        },
        &scope,
        &ExitWatcher::new(),
        &UnixSyslogConnector,
    )?;

    match path {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: built-in defaults"),
    }
    for server in logs.servers() {
        println!(
            "  {:<16} {:<6} {}",
            server.name(),
            server.threshold(),
            server.destination().describe()
        );
    }
    println!("Syntax OK ({} distinct error logs)", logs.distinct_destinations());

    logs.close();
    Ok(())
}
