//! Daemon runtime: starts the launcher and drains its events.

use std::future::Future;

use botlink_connector::Launcher;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::error::Result;

/// Run the configured connectors until interrupted with Ctrl-C.
///
/// # Errors
///
/// Returns an error if the launcher cannot be built or bound.
pub async fn run(config: DaemonConfig) -> Result<()> {
    run_until(config, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
    })
    .await
}

/// Run the configured connectors until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the launcher cannot be built or bound.
pub async fn run_until(config: DaemonConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let (launcher, events) = Launcher::new(config.launcher, config.connectors)?;
    info!(connectors = launcher.connectors().len(), "Connectors ready");

    let pump = tokio::spawn(log_events(events));
    let token = launcher.shutdown_token();

    let running = async {
        let outcome = launcher.run().await;
        token.cancel();
        outcome
    };
    let stopper = async {
        tokio::select! {
            () = shutdown => token.cancel(),
            () = token.cancelled() => {}
        }
    };
    let (outcome, ()) = tokio::join!(running, stopper);

    pump.abort();
    info!("Daemon stopped");
    outcome.map_err(Into::into)
}

/// Log every event until all senders are gone. Returns how many arrived.
async fn log_events(mut events: mpsc::Receiver<Value>) -> usize {
    let mut count = 0;
    while let Some(event) = events.recv().await {
        count += 1;
        let kind = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
        debug!(kind, %event, "Event");
    }
    count
}
