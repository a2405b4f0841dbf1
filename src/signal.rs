//! SIGINT/SIGTERM handling for `update`.
//!
//! A signal never interrupts a set mutation half-way: the synchronizer
//! checks the token between sources and stops before the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cancellation flag shared between the signal listener and the synchronizer.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Listens for SIGINT and SIGTERM while alive and cancels its token on receipt.
pub struct ShutdownGuard {
    token: ShutdownToken,
    listener: JoinHandle<()>,
}

impl ShutdownGuard {
    /// Start listening. Must be called inside a tokio runtime.
    ///
    /// If handlers cannot be registered the guard still works as a plain
    /// token holder; shutdown is then only possible through the token.
    pub fn new() -> Self {
        let token = ShutdownToken::new();
        let listener_token = token.clone();

        let listener = tokio::spawn(async move {
            let sigint = signal(SignalKind::interrupt())
                .map_err(|e| warn!("Failed to register SIGINT handler: {}", e))
                .ok();
            let sigterm = signal(SignalKind::terminate())
                .map_err(|e| warn!("Failed to register SIGTERM handler: {}", e))
                .ok();

            let name = match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => "SIGINT",
                        _ = term.recv() => "SIGTERM",
                    }
                }
                (Some(mut int), None) => {
                    int.recv().await;
                    "SIGINT"
                }
                (None, Some(mut term)) => {
                    term.recv().await;
                    "SIGTERM"
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                    return;
                }
            };
            info!("Received {}, stopping after the current source...", name);
            listener_token.cancel();
        });

        Self { token, listener }
    }

    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
