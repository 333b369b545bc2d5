//! # ftpbridge
//!
//! Command-line daemon around the transfer engine.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ftpbridge agent                               │
//! │                                                                         │
//! │  ftpbridge.toml + FTPBRIDGE_* ──► BridgeSettings ──► ProcessorHost     │
//! │                                                          │              │
//! │                         ┌────────────────────────────────┤              │
//! │                         ▼                                ▼              │
//! │                 LocalStore (<data>/files)     events.jsonl (NewFile)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod events;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ftpbridge_sync::{BridgeSettings, Collaborators, DefaultNormalizer, ProcessorHost};

use crate::events::JsonLinesSink;
use crate::store::LocalStore;

/// Continuous FTP/FTPS/SFTP file bridge.
#[derive(Parser)]
#[command(name = "ftpbridge", version, about)]
struct Cli {
    /// Settings file; defaults to the per-user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding stored files and the event log.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the input folder until Ctrl-C or SIGTERM.
    Run {
        /// Attach a structured view of each new file to its event.
        #[arg(long)]
        normalize: bool,
    },
    /// Upload a stored file to the output folder.
    Send {
        file_id: String,
        /// Sub-folder below the output folder.
        #[arg(long)]
        folder: Option<String>,
    },
    /// Validate settings and print the resolved endpoint.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let settings = BridgeSettings::load(cli.config.clone()).context("loading settings")?;

    match cli.command {
        Command::Check => check(&settings),
        Command::Run { normalize } => {
            let host = host(cli.data_dir, normalize)?;
            run(&host, &settings).await
        }
        Command::Send { file_id, folder } => {
            let host = host(cli.data_dir, false)?;
            send(&host, &settings, &file_id, folder.as_deref()).await
        }
    }
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=ftpbridge_sync=trace` - Include server banners
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// `--data-dir`, else the platform data directory.
fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            directories::ProjectDirs::from("com", "ftpbridge", "ftpbridge")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("ftpbridge-data"))
}

fn host(data_dir_arg: Option<PathBuf>, normalize: bool) -> anyhow::Result<ProcessorHost> {
    let root = data_dir(data_dir_arg);
    let store = LocalStore::open(root.join("files"))
        .with_context(|| format!("opening store in {}", root.display()))?;
    info!(store = %store.root().display(), "Using local store");

    let sink = JsonLinesSink::new(root.join("events.jsonl"));

    let mut collaborators = Collaborators::new(Arc::new(store), Arc::new(sink));
    if normalize {
        collaborators = collaborators.with_normalizer(Arc::new(DefaultNormalizer));
    }
    Ok(ProcessorHost::new(collaborators))
}

fn check(settings: &BridgeSettings) -> anyhow::Result<()> {
    let endpoint = settings.resolve_endpoint()?;
    let wire = settings.wire_options();

    println!("{}", serde_json::to_string_pretty(&endpoint.summary())?);
    println!("input:  {}", endpoint.input_uri(&wire));
    println!("upload: {}", endpoint.upload_uri(None, &wire));
    Ok(())
}

async fn run(host: &ProcessorHost, settings: &BridgeSettings) -> anyhow::Result<()> {
    host.start(settings).await.context("starting processor")?;
    info!(service = %settings.service.name, "ftpbridge running");

    shutdown_signal().await;

    host.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn send(
    host: &ProcessorHost,
    settings: &BridgeSettings,
    file_id: &str,
    folder: Option<&str>,
) -> anyhow::Result<()> {
    match host.send_file_with_config(settings, file_id, folder).await {
        Ok(receipt) => {
            println!(
                "{}",
                serde_json::json!({
                    "fileId": receipt.file_id,
                    "remotePath": receipt.remote_path,
                    "attempts": receipt.attempts,
                    "bytes": receipt.bytes,
                })
            );
            Ok(())
        }
        Err(e) => {
            let report = e.to_report();
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            bail!("send failed: {}", report)
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping processor...");
}
