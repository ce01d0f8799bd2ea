//! # Graceful Shutdown Module
//!
//! Turns Ctrl-C / SIGTERM into cancellation of the run's
//! [`CancellationToken`]. The dispatcher stops admitting new requests while
//! requests already in flight finish or time out, so a partial report can
//! still be written.
//!
//! ## Shutdown Process:
//!
//! 1. **Signal Reception**: first SIGINT or SIGTERM cancels the token
//! 2. **Stop Admitting**: the dispatcher leaves its admission loop
//! 3. **Drain**: in-flight probes complete and are recorded
//! 4. **Report**: the caller renders and saves the partial results
//!
//! A second signal while draining exits the process immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status used when a second signal aborts the drain.
pub const FORCED_EXIT_CODE: i32 = 130;

/// # Graceful Shutdown Manager
///
/// Cheap to clone; all clones share one token.
#[derive(Clone, Debug)]
pub struct GracefulShutdown {
    token: CancellationToken,
    shutdown_complete: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Wrap an existing token, e.g. one already handed to a dispatcher.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            shutdown_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token to hand to the dispatcher.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Relaxed)
    }

    /// Stop admitting new requests.
    pub fn initiate_shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("Graceful shutdown initiated, no new requests will be started");
        }
        self.token.cancel();
    }

    pub fn complete_shutdown(&self) {
        info!("Graceful shutdown completed");
        self.shutdown_complete.store(true, Ordering::Relaxed);
    }

    /// Wait for one shutdown signal and initiate shutdown.
    pub async fn wait_for_shutdown_signal(&self) -> std::io::Result<()> {
        wait_for_signal().await?;
        self.initiate_shutdown();
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}

/// Spawn the signal listener for a run.
///
/// The first signal cancels `shutdown`'s token. Once the token is cancelled,
/// by a signal or otherwise, any further signal before the run completes
/// exits with [`FORCED_EXIT_CODE`].
pub fn setup_shutdown_handler(shutdown: &GracefulShutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = shutdown.wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    error!("Error waiting for shutdown signal: {}", e);
                    return;
                }
            }
            _ = shutdown.token.cancelled() => {}
        }

        match wait_for_signal().await {
            Ok(()) if !shutdown.is_shutdown_complete() => {
                warn!("Second signal received, aborting in-flight requests");
                std::process::exit(FORCED_EXIT_CODE);
            }
            Ok(()) => {}
            Err(e) => error!("Error waiting for shutdown signal: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert!(!shutdown.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_shutdown_initiation_cancels_token() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();
        shutdown.initiate_shutdown();
        assert!(token.is_cancelled());
        assert!(shutdown.is_shutdown_initiated());
        assert!(!shutdown.is_shutdown_complete());
    }

    #[tokio::test]
    async fn test_external_token_cancellation_is_seen() {
        let token = CancellationToken::new();
        let shutdown = GracefulShutdown::with_token(token.clone());
        token.cancel();
        assert!(shutdown.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_shutdown_completion() {
        let shutdown = GracefulShutdown::new();
        shutdown.initiate_shutdown();
        shutdown.complete_shutdown();
        assert!(shutdown.is_shutdown_initiated());
        assert!(shutdown.is_shutdown_complete());
    }
}
