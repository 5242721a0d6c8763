//! # clive-host
//!
//! Host process binary: binds the bridge endpoint for the tool server and
//! serves the application router as newline-delimited JSON on stdio.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clive_bridge::BridgeConfig;
use clive_core::logging::{LogFormat, init_subscriber};
use clive_host::host::{Host, HostOptions};
use clive_settings::{init_settings, load_settings_from_path, settings_path};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Clive host process.
#[derive(Parser, Debug)]
#[command(name = "clive-host", about = "Clive host: bridge endpoint and stdio RPC")]
struct Cli {
    /// Workspace root (defaults to `workspace` in settings, then the
    /// current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Directory for bridge sockets (overrides settings).
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Settings file (defaults to `~/.clive/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log format: `pretty` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    let log_format = args.log_format.unwrap_or(settings.logging.format);
    if !init_subscriber(log_format, &settings.logging.level) {
        tracing::warn!(?log_format, "tracing subscriber already installed, keeping it");
    }
    init_settings(settings.clone());

    let workspace = match args.workspace.or_else(|| settings.workspace.as_ref().map(PathBuf::from)) {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Workspace not found: {}", workspace.display()))?;

    let mut options = HostOptions::new(&workspace, settings.clone());
    if let Some(dir) = args.socket_dir {
        let mut bridge = BridgeConfig::from_settings(&settings.bridge);
        bridge.socket_dir = dir;
        options = options.bridge(bridge);
    }

    let host = Host::new(options).context("Failed to assemble host")?;
    let socket = host.start_bridge().await.context("Failed to start bridge")?;
    tracing::info!(
        workspace = %workspace.display(),
        socket = %socket.display(),
        "clive host ready"
    );

    let shutdown = host.shutdown_token();
    tokio::select! {
        () = host.serve_io(tokio::io::stdin(), tokio::io::stdout()) => {
            tracing::info!("stdin closed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
        }
    }

    tracing::info!("Shutting down...");
    shutdown.cancel();
    host.shutdown().await;
    Ok(())
}
