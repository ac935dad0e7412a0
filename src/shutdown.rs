//! Process-wide shutdown request.
//!
//! Signal handlers and the key reader only trigger the token; all cleanup
//! happens on the main control path after the refresh loop observes it.

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Trigger on SIGINT or SIGTERM (Ctrl-C elsewhere).
    ///
    /// The listener task ends when shutdown is triggered by anyone.
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.triggered() => return,
                name = wait_for_signal() => info!(signal = name, "interrupt received, shutting down"),
            }
            shutdown.trigger();
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut term) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
