//! treesync CLI
//!
//! Scans a directory tree once, or watches it and prints every flushed diff.

mod signals;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use treesync_core::{CoreError, DiffSink, SyncConfig, SyncSession};
use treesync_engine::{PendingDiff, TreeMappingBuilder};

#[derive(Parser)]
#[command(name = "treesync")]
#[command(about = "treesync - keep an in-memory mirror of a directory tree")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory once and print its tree as JSON
    Scan {
        /// Directory to scan (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Path prefix to ignore (repeatable)
        #[arg(short, long)]
        ignore: Vec<PathBuf>,
    },

    /// Watch a directory and print each flushed diff as a JSON line
    Watch {
        /// Directory to watch (default: current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Path prefix to ignore (repeatable)
        #[arg(short, long)]
        ignore: Vec<PathBuf>,

        /// Configuration file (default: ~/.treesync/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { path, ignore } => {
            let config = SyncConfig::load();
            init_logging(&config.log_level);
            cmd_scan(path, ignore, config).await
        }
        Commands::Watch {
            path,
            ignore,
            config,
        } => {
            let mut config = match config {
                Some(file) => SyncConfig::load_from(&file)
                    .with_context(|| format!("Failed to load config from {}", file.display()))?,
                None => SyncConfig::load(),
            };
            config.ignored.extend(ignore);

            init_logging(&config.log_level);
            cmd_watch(path, config).await
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_scan(path: PathBuf, ignore: Vec<PathBuf>, config: SyncConfig) -> Result<()> {
    let mut builder = TreeMappingBuilder::new().options(config.mapping_options());
    for prefix in ignore {
        builder = builder.ignore(prefix);
    }

    let mapping = builder
        .init(&path)
        .await
        .with_context(|| format!("Failed to scan {}", path.display()))?;

    let tree = mapping.get();
    mapping.dispose();

    let json = serde_json::to_string_pretty(&tree).context("Failed to serialize tree")?;
    println!("{}", json);
    Ok(())
}

async fn cmd_watch(path: PathBuf, config: SyncConfig) -> Result<()> {
    let session = SyncSession::start(&path, &config, Arc::new(StdoutSink))
        .await
        .with_context(|| format!("Failed to watch {}", path.display()))?;

    tracing::info!(root = %session.mapping().root().display(), "Watching, press Ctrl+C to stop");

    signals::wait_for_shutdown().await;
    session.shutdown().await;

    let stats = session.stats().snapshot();
    tracing::info!(
        flushes = stats.flushes,
        paths = stats.paths_delivered,
        avg_paths = session.stats().avg_paths_per_flush(),
        uptime_secs = stats.uptime_secs,
        "Stopped"
    );
    Ok(())
}

/// Prints each diff as one JSON line on stdout.
struct StdoutSink;

#[async_trait]
impl DiffSink for StdoutSink {
    async fn deliver(&self, diff: PendingDiff) -> Result<(), CoreError> {
        let line =
            serde_json::to_string(&diff).map_err(|e| CoreError::Sink(e.to_string()))?;

        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}
