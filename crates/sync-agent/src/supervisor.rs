//! Process lifecycle: signal handling and the periodic reconciliation tick.
//! Grounded in `docx-storage-local/src/main.rs`'s `create_shutdown_signal`.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use crate::engine::SyncEngine;

/// Installs Ctrl+C and (on Unix) SIGTERM handlers and returns a `watch`
/// receiver that flips to `true` exactly once, on the first signal received.
pub fn install_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
            info!("received SIGTERM, initiating shutdown");
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}

/// Drives the periodic reconciliation tick (default 30 s) until shutdown is
/// signaled. The bulk reconciliation is authoritative; the debounced
/// event-driven path is only an optimization layered on top of it.
pub async fn run_tick_loop(
    engine: Arc<SyncEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.trigger_sync_all().await {
                    tracing::warn!("tick reconciliation failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("tick loop stopping on shutdown signal");
                    break;
                }
            }
        }
    }
}
