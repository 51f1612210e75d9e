//! Botlink daemon entry point.
//!
//! Loads the connector config, keeps every gateway session alive and logs
//! the events they deliver.

use std::path::PathBuf;

use anyhow::Context;
use botlink_daemon::DaemonConfig;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Botlink daemon - keeps bot gateway sessions alive
#[derive(Parser, Debug)]
#[command(name = "botlink-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to `~/.config/botlink/config.json`)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Per-run log file in the temp dir, with a stable `botlink-daemon.log`
/// symlink pointing at the newest one.
fn debug_log_file() -> (PathBuf, String) {
    let dir = std::env::temp_dir();
    let name = format!(
        "botlink-daemon-{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );

    #[cfg(unix)]
    {
        let latest = dir.join("botlink-daemon.log");
        let _ = std::fs::remove_file(&latest);
        let _ = std::os::unix::fs::symlink(dir.join(&name), &latest);
    }

    (dir, name)
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins; otherwise botlink crates log at debug in debug builds
/// and info in release. Debug builds also keep a full-detail file log so
/// frame traces survive the terminal.
fn setup_logging() {
    let verbose = cfg!(debug_assertions);
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("botlink={level}")));

    let file_layer = verbose.then(|| {
        let (dir, name) = debug_log_file();
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &name));
        // The daemon logs until exit; the guard must outlive main.
        std::mem::forget(guard);
        eprintln!("Logging to: {}", dir.join(&name).display());

        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_line_number(true)
    });

    let stderr_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    let path = match args.config {
        Some(path) => path,
        None => DaemonConfig::default_path()?,
    };
    let config = DaemonConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    info!(config = %path.display(), "Starting botlink daemon...");
    botlink_daemon::run(config).await?;

    info!("Botlink daemon stopped");
    Ok(())
}
