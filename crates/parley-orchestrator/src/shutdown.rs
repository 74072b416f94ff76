// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown coordination with signal handling.
//!
//! SIGTERM and SIGINT cancel a [`CancellationToken`] shared by the HTTP
//! server and the job workers. Workers finish the job they are running
//! before exiting; [`drain_workers`] waits for them up to a deadline.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a token that is cancelled when either signal arrives.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, initiating shutdown"),
                _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
            }
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, listening for SIGINT only");
            let _ = ctrl_c.await;
            info!("received SIGINT, initiating shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl+C, initiating shutdown");
}

/// Waits up to `timeout` for worker tasks to exit.
///
/// Returns `true` if all of them finished in time. Stragglers are left
/// running; the runtime drops them on exit.
pub async fn drain_workers(handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
    if handles.is_empty() {
        return true;
    }
    let count = handles.len();
    info!(count, "waiting for job workers to finish");

    match tokio::time::timeout(timeout, join_all(handles)).await {
        Ok(results) => {
            let panicked = results.iter().filter(|r| r.is_err()).count();
            if panicked > 0 {
                warn!(panicked, "job workers ended abnormally");
            } else {
                info!("all job workers drained");
            }
            true
        }
        Err(_) => {
            warn!(count, ?timeout, "timeout reached, some job workers still running");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_signal_handler_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
    }

    #[tokio::test]
    async fn drain_with_no_workers_is_immediate() {
        assert!(drain_workers(Vec::new(), Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn drain_waits_for_cancelled_workers() {
        let token = CancellationToken::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let token = token.clone();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();
        token.cancel();
        assert!(drain_workers(handles, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn drain_reports_stuck_workers() {
        let stuck = tokio::spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });
        assert!(!drain_workers(vec![stuck], Duration::from_millis(20)).await);
    }
}
