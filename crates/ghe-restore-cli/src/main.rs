use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod prompt;

use commands::restore::{OutputFormat, RestoreArgs};

#[derive(Parser)]
#[command(name = "ghe-restore")]
#[command(about = "Restore an appliance snapshot to a target host", long_about = None)]
#[command(version)]
struct Cli {
    /// Target host, optionally host:port (defaults to restore_host from the config)
    host: Option<String>,

    /// Snapshot to restore (defaults to the current snapshot)
    #[arg(short, long)]
    snapshot: Option<String>,

    /// Don't prompt for confirmation before restoring
    #[arg(short, long)]
    force: bool,

    /// Restore appliance settings and license in addition to datastores
    #[arg(short = 'c', long = "config")]
    restore_settings: bool,

    /// Path to the backup-utils configuration file
    #[arg(long, env = "GHE_BACKUP_CONFIG")]
    backup_config: Option<String>,

    /// Summary format (text, json)
    #[arg(long, default_value = "text")]
    format: String,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(parse_exit_code(e.kind()));
        }
    };

    // Initialize tracing
    // Priority: RUST_LOG env var > verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        commands::restore::report_error(&e);
        std::process::exit(1);
    }
}

/// Help and version requests succeed; every argument error exits 1
fn parse_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let args = RestoreArgs {
        host: cli.host,
        snapshot: cli.snapshot,
        force: cli.force,
        restore_settings: cli.restore_settings,
        config_path: cli.backup_config,
        format: OutputFormat::from(cli.format.as_str()),
        verbose: cli.verbose > 0,
    };
    commands::restore::run(args).await
}
