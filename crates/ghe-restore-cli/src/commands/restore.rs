//! CLI command running a full restore against one target.

use anyhow::{Context, Result};
use ghe_restore_core::{
    Config, Error, ProcessToolRunner, RestoreOrchestrator, RestoreReport, RestoreRequest,
    SshExecutor,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::prompt::StdinConfirmation;

/// Output format for the restore summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Parsed command line for a restore
pub struct RestoreArgs {
    pub host: Option<String>,
    pub snapshot: Option<String>,
    pub force: bool,
    pub restore_settings: bool,
    pub config_path: Option<String>,
    pub format: OutputFormat,
    pub verbose: bool,
}

pub async fn run(args: RestoreArgs) -> Result<()> {
    let config = match &args.config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::load(path)?
        }
        None => Config::default(),
    }
    .with_env_overrides();

    let target_host = config.resolve_host(args.host.as_deref())?;

    let executor = Arc::new(SshExecutor::new(config.ssh.clone()));
    let tools = Arc::new(ProcessToolRunner::new(&config.tools_dir));
    let orchestrator = RestoreOrchestrator::new(config, executor, tools, Arc::new(StdinConfirmation))
        .context("Invalid configuration")?;

    let (signal_tx, signal_rx) = mpsc::channel(4);
    listen_for_signals(signal_tx);
    tokio::spawn(forward_interrupts(signal_rx, orchestrator.shutdown_handle()));

    let request = RestoreRequest {
        target_host,
        snapshot_id: args.snapshot,
        restore_settings: args.restore_settings,
        force: args.force,
        verbose: args.verbose,
    };
    let report = orchestrator.run(&request).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_summary(&report),
    }

    Ok(())
}

/// Feed Ctrl-C and, on unix, SIGTERM into `signals`
fn listen_for_signals(signals: mpsc::Sender<&'static str>) {
    #[cfg(unix)]
    {
        let signals = signals.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    return;
                }
            };
            while terminate.recv().await.is_some() {
                if signals.send("SIGTERM").await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if signals.send("interrupt").await.is_err() {
                break;
            }
        }
    });
}

/// Turn every received signal into a shutdown request.
///
/// The process is never exited from here: the restore always unwinds through
/// its exit guard so a `failed` status is published and the transport released.
async fn forward_interrupts(
    mut signals: mpsc::Receiver<&'static str>,
    shutdown: broadcast::Sender<()>,
) -> usize {
    let mut received = 0;
    while let Some(name) = signals.recv().await {
        received += 1;
        if received == 1 {
            warn!("Received {}, stopping after the current step", name);
        } else {
            warn!("Received {} again, already stopping after the current step", name);
        }
        let _ = shutdown.send(());
    }
    received
}

/// Print an error and, for known failures, what the operator can do about it
pub fn report_error(err: &anyhow::Error) {
    eprintln!("Error: {:#}", err);
    if let Some(hint) = err.downcast_ref::<Error>().and_then(Error::hint) {
        eprintln!("{}", hint);
    }
}

fn print_summary(report: &RestoreReport) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                              RESTORE SUMMARY                                 ║");
    println!("╠══════════════════════════════════════════════════════════════════════════════╣");
    row("Host:", &report.host);
    row("Snapshot:", &report.snapshot_id);
    row(
        "Versions:",
        &format!("{} -> {}", report.snapshot_version, report.remote_version),
    );
    row("Topology:", if report.cluster { "cluster" } else { "standalone" });
    row("Repositories:", &format!("{:?}", report.repository_strategy));
    row(
        "Status:",
        if report.success() { "✓ COMPLETE" } else { "✗ FAILED" },
    );
    row("Started:", &format_timestamp(report.start_time));
    row("Duration:", &format!("{}ms", report.duration_ms));
    println!("╟──────────────────────────────────────────────────────────────────────────────╢");
    row("Steps run:", &report.executed_steps.len().to_string());
    row("Steps skipped:", &report.skipped_steps.join(", "));

    if !report.warnings.is_empty() {
        println!("╟──────────────────────────────────────────────────────────────────────────────╢");
        println!("║ WARNINGS                                                                     ║");
        for warning in &report.warnings {
            println!("║   - {:72} ║", truncate_string(warning, 72));
        }
    }

    println!("╚══════════════════════════════════════════════════════════════════════════════╝");

    println!("{}", report.completion_message());
    if let Some(hint) = report.setup_hint() {
        println!("{}", hint);
    }
}

fn row(label: &str, value: &str) {
    println!("║ {:<16}{:60} ║", label, truncate_string(value, 60));
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
