use std::time::Duration;

use eyre::{Context, Result};
use tokio::{signal, sync::broadcast};
use tokio_util::sync::CancellationToken;

/// Represents what an OS signal asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Stop accepting connections and drain (SIGTERM, SIGINT)
    Shutdown,
    /// Re-read filter settings from the config file (SIGHUP)
    Reload,
}

/// Manages graceful shutdown and settings reload.
///
/// Shutdown is a [`CancellationToken`]: event loops select on it and stop
/// accepting once cancelled. Reload requests are broadcast so the process
/// can swap filter settings without restarting.
pub struct GracefulShutdown {
    token: CancellationToken,
    reload_tx: broadcast::Sender<()>,
    /// Maximum time to wait for event loops to drain
    shutdown_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 30-second timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(shutdown_timeout: Duration) -> Self {
        let (reload_tx, _) = broadcast::channel(4);
        Self {
            token: CancellationToken::new(),
            reload_tx,
            shutdown_timeout,
        }
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Receiver notified on every reload request.
    pub fn subscribe_reload(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        if self.token.is_cancelled() {
            tracing::warn!("Shutdown already initiated, ignoring request");
            return;
        }
        tracing::info!("Shutdown initiated");
        self.token.cancel();
    }

    pub fn trigger_reload(&self) {
        if self.reload_tx.send(()).is_err() {
            tracing::debug!("Reload requested with nobody listening");
        }
    }

    /// Dispatch OS signals until a shutdown signal arrives.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!(
            "Signal handler started. Listening for SIGTERM, SIGINT (graceful shutdown) and SIGHUP (reload)"
        );
        let mut signals = UnixSignals::register()?;

        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                ctrl_c = signal::ctrl_c() => {
                    ctrl_c.context("Failed to listen for Ctrl+C")?;
                    tracing::info!("Received SIGINT (Ctrl+C)");
                    SignalEvent::Shutdown
                }
                event = signals.recv() => event,
            };

            match event {
                SignalEvent::Shutdown => {
                    self.trigger_shutdown();
                    break;
                }
                SignalEvent::Reload => {
                    tracing::info!("Received SIGHUP, reloading filter settings");
                    self.trigger_reload();
                }
            }
        }

        tracing::info!("Signal handler shutting down");
        Ok(())
    }

    /// Resolves once shutdown has been initiated.
    pub async fn wait_for_shutdown_signal(&self) {
        self.token.cancelled().await;
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
struct UnixSignals {
    sigterm: signal::unix::Signal,
    sighup: signal::unix::Signal,
}

#[cfg(unix)]
impl UnixSignals {
    fn register() -> Result<Self> {
        use signal::unix::{SignalKind, signal};
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                SignalEvent::Shutdown
            }
            _ = self.sighup.recv() => SignalEvent::Reload,
        }
    }
}

// Only Ctrl+C exists off unix.
#[cfg(not(unix))]
struct UnixSignals;

#[cfg(not(unix))]
impl UnixSignals {
    fn register() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> SignalEvent {
        std::future::pending().await
    }
}
