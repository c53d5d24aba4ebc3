//! ovoscan CLI - detection server and submit client
//!
//! `ovoscan serve` runs the HTTP server in front of the configured detector
//! command. `ovoscan submit` uploads images to a running server and waits
//! for the labels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ovoscan_core::config::ConfigManager;
use ovoscan_core::detector::is_error_label;
use ovoscan_core::{CommandDetector, Config, DetectionClient, Phase, PollPolicy};

#[derive(Parser)]
#[command(name = "ovoscan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Asynchronous image detection server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Address to listen on, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,

        /// Number of concurrent detection jobs
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Upload images to a running server and wait for the results
    Submit {
        /// Image files to upload as one batch
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Server base URL
        #[arg(short, long, default_value = "http://127.0.0.1:8000")]
        server: String,

        /// Delay between status polls
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Give up after this many polls
        #[arg(long, default_value_t = 120)]
        max_attempts: u32,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    }
    .context("failed to load configuration")?;

    init_logging(cli.verbose, &manager.config().general.log_level);

    match cli.command.unwrap_or(Commands::Serve {
        bind: None,
        workers: None,
    }) {
        Commands::Serve { bind, workers } => run_serve(manager.into_config(), bind, workers).await,
        Commands::Submit {
            files,
            server,
            interval_ms,
            max_attempts,
        } => {
            let policy = PollPolicy::new(Duration::from_millis(interval_ms), max_attempts);
            run_submit(files, &server, policy).await
        }
        Commands::Config => show_config(&manager),
    }
}

/// RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,ovoscan_core=debug,ovoscan_server=debug")
        } else {
            EnvFilter::new(log_level)
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_serve(
    mut config: Config,
    bind: Option<String>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(workers) = workers {
        config.runner.workers = workers;
    }
    config.validate()?;

    let detector = CommandDetector::from_config(&config.detector)
        .context("set detector.command in the config file to the detection program")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for ctrl-c"),
        }
        signal.cancel();
    });

    ovoscan_server::serve(config, Arc::new(detector), shutdown).await
}

async fn run_submit(files: Vec<PathBuf>, server: &str, policy: PollPolicy) -> anyhow::Result<()> {
    let client = DetectionClient::new(server);
    let session_id = client
        .upload_paths(&files)
        .await
        .with_context(|| format!("upload to {} failed", server))?;
    eprintln!("{} {}", style("Session").bold(), style(&session_id).cyan());

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.enable_steady_tick(Duration::from_millis(100));

    let outcome = client
        .wait_for_result_with(&session_id, policy, |status| {
            progress.set_length(status.total as u64);
            progress.set_position(status.processed as u64);
            progress.set_message(status.status.to_string());
        })
        .await;

    let report = match outcome {
        Ok(report) => {
            progress.finish_with_message(Phase::Complete.to_string());
            report
        }
        Err(e) => {
            progress.abandon_with_message(style("failed").red().to_string());
            return Err(e.into());
        }
    };

    let failed = report
        .results
        .values()
        .filter(|label| is_error_label(label))
        .count();
    if failed > 0 {
        eprintln!(
            "{}",
            style(format!("{} of {} images could not be processed", failed, report.total_images))
                .yellow()
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn show_config(manager: &ConfigManager) -> anyhow::Result<()> {
    eprintln!(
        "{} {}",
        style("Config file:").bold(),
        style(manager.config_path().display()).cyan()
    );
    if !manager.config_path().exists() {
        eprintln!("{}", style("(not found, showing defaults)").dim());
    }
    println!("{}", toml::to_string_pretty(manager.config())?);
    Ok(())
}
