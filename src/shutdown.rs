//! Graceful shutdown.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels a [`CancellationToken`]: no
//! new downloads start, in-flight ones finish, and the archive run reports
//! where it stopped. A second signal force-exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Register signal listeners and return the token they cancel.
///
/// Listeners are registered before this returns so a signal arriving during
/// startup is not lost, and so registration failures surface as errors.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        )
    };

    let handler_token = token.clone();
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
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Unable to listen for Ctrl+C; graceful shutdown disabled");
                    return;
                }
            }

            let prev = count.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                tracing::info!("Received shutdown signal, letting in-flight downloads finish...");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
