//! CLI entry point for the driftwatch tool.
//!
//! This binary watches one or more directories and reports batches of
//! filesystem changes once activity has settled, optionally running a
//! shell command per settled batch.
//!
//! # Usage
//!
//! ```bash
//! driftwatch [OPTIONS] [PATHS]...
//!
//! # Watch the current directory, print settled batches
//! driftwatch
//!
//! # Watch two directories, rebuild after 2s of quiet
//! driftwatch --damper 2 --command 'make build' ./src ./assets
//!
//! # Flush per-path buffers every 30s or at 500 events
//! driftwatch --timeout 30 --max-events 500 /var/spool/incoming
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::process::Command;

use camino::Utf8PathBuf;
use clap::Parser;
use dw_core::{BufferConfig, Config, DamperConfig, RetryConfig};
use dw_watcher::{BatchStats, ChangeStream, EventBatch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch directories and report filesystem changes once they settle.
///
/// Changes are buffered per path and merged across paths; a batch is
/// delivered only after the whole watched set has been quiet for the
/// damper window.
#[derive(Parser)]
#[command(name = "driftwatch", version, about, long_about = None)]
struct Cli {
    /// Directories to watch.
    ///
    /// Defaults to the current directory if none are given. A directory
    /// that does not exist yet is watched as soon as it appears.
    paths: Vec<Utf8PathBuf>,

    /// Shell command to run for each settled batch.
    ///
    /// Runs via `sh -c`; a non-zero exit is logged and watching
    /// continues. Without a command, batches are printed to stdout.
    #[arg(short, long, env = "DRIFTWATCH_COMMAND")]
    command: Option<String>,

    /// Per-path buffer flush timeout in seconds.
    #[arg(short, long, default_value_t = 600, env = "DRIFTWATCH_TIMEOUT")]
    timeout: u64,

    /// Maximum buffered events per path before a forced flush.
    #[arg(short, long, default_value_t = 100, env = "DRIFTWATCH_MAX_EVENTS")]
    max_events: usize,

    /// Quiet window in seconds before a batch is delivered.
    ///
    /// Zero delivers each per-path flush promptly without cross-path
    /// coalescing.
    #[arg(short, long, default_value_t = 0, env = "DRIFTWATCH_DAMPER")]
    damper: u64,

    /// Read settings from a JSON configuration file instead of the
    /// timing flags above.
    #[arg(long, env = "DRIFTWATCH_CONFIG", conflicts_with_all = ["timeout", "max_events", "damper"])]
    config: Option<Utf8PathBuf>,

    /// Print each batch as a JSON stats object instead of event lines.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// The `notify` backend is filtered to `warn` level.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn,mio=warn"))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi))
        .with(filter)
        .init();
}

/// Builds a [`Config`] from CLI arguments, or loads it from the file
/// given with `--config`.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    if let Some(path) = &cli.config {
        return Ok(Config::load(path)?);
    }

    let config = Config {
        buffer: BufferConfig {
            flush_timeout_ms: cli.timeout.saturating_mul(1000),
            max_events: cli.max_events,
        },
        retry: RetryConfig::default(),
        damper: DamperConfig {
            quiet_ms: cli.damper.saturating_mul(1000),
        },
    };
    config.validate()?;
    Ok(config)
}

/// Resolves the watched paths: the positional arguments, or the current
/// directory when none are given.
fn resolve_paths(cli: &Cli) -> color_eyre::Result<Vec<Utf8PathBuf>> {
    if !cli.paths.is_empty() {
        return Ok(cli.paths.clone());
    }
    let cwd = std::env::current_dir()?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| color_eyre::eyre::eyre!("current directory is not UTF-8: {}", p.display()))?;
    Ok(vec![cwd])
}

// =============================================================================
// BATCH HANDLING
// =============================================================================

/// Handles one settled batch: runs the configured command, or prints
/// the batch to stdout.
fn handle_batch(batch: &EventBatch, command: Option<&str>, json: bool) {
    info!(
        events = batch.len(),
        paths = batch.unique_paths().len(),
        "batch settled"
    );

    match command {
        Some(cmd) => run_command(cmd, batch),
        None => print_batch(batch, json),
    }
}

/// Runs the batch command via `sh -c`, logging failures without
/// stopping the watch loop.
fn run_command(cmd: &str, batch: &EventBatch) {
    match Command::new("sh").arg("-c").arg(cmd).status() {
        Ok(status) if status.success() => {
            info!(command = cmd, "command completed");
        }
        Ok(status) => {
            warn!(command = cmd, %status, events = batch.len(), "command failed");
        }
        Err(e) => {
            error!(command = cmd, error = %e, "command could not be started");
        }
    }
}

/// Prints a settled batch to stdout, one event per line, followed by a
/// stats summary.
fn print_batch(batch: &EventBatch, json: bool) {
    let stats = BatchStats::from_batch(batch);
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    if json {
        if let Ok(line) = serde_json::to_string(&stats) {
            let _ = writeln!(handle, "{line}");
        }
        return;
    }

    for event in batch {
        let _ = writeln!(handle, "{event}");
    }
    let _ = writeln!(
        handle,
        "-- {} events across {} paths ({} created, {} modified, {} deleted)",
        stats.total_events, stats.unique_paths, stats.created, stats.modified, stats.deleted
    );
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Waits for a shutdown signal: Ctrl-C everywhere, SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    }
}

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.no_color);

    let config = build_config(&cli)?;
    let paths = resolve_paths(&cli)?;

    let mut stream = ChangeStream::new(config);
    stream.add_all(paths.iter().cloned())?;
    for path in &paths {
        info!(dir = %path, "watching");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            batch = stream.recv() => match batch {
                Some(batch) => handle_batch(&batch, cli.command.as_deref(), cli.json),
                None => break,
            },
            () = &mut shutdown => break,
        }
    }

    // Stop watching off the async runtime; the joins block.
    let mut stream = tokio::task::spawn_blocking(move || {
        stream.close();
        stream
    })
    .await
    .map_err(|e| color_eyre::eyre::eyre!("shutdown task failed: {e}"))?;

    // Deliver anything that was still buffered at shutdown.
    while let Some(batch) = stream.try_recv() {
        handle_batch(&batch, cli.command.as_deref(), cli.json);
    }

    Ok(())
}
