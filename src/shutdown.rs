//! Graceful shutdown on signals.
//!
//! Listens for SIGINT (Ctrl+C), SIGTERM, and SIGHUP, then cancels the
//! controller's stop token so workers finish the item in flight and the
//! ledger is checkpointed. A second signal force-exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first SIGINT / SIGTERM / SIGHUP. A second signal
/// exits the process with status 130 without saving.
pub(crate) fn install_signal_handler(token: CancellationToken) -> std::io::Result<()> {
    let count = Arc::new(AtomicU32::new(0));

    // Register up front so a failure surfaces to the caller.
    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            }

            let prev = count.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                tracing::info!("Received shutdown signal, finishing current transfers...");
                tracing::info!("Press Ctrl+C again to force exit");
                token.cancel();
            } else {
                tracing::warn!("Force exit requested, progress since the last checkpoint is lost");
                std::process::exit(130);
            }
        }
    });

    Ok(())
}
