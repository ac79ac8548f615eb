//! Turns process shutdown signals into cooperative cancellation.

use std::io;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Cancel `cancel` on the first SIGINT (Ctrl-C) or SIGTERM.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after the call is not missed. Must be called inside a tokio runtime.
#[cfg(unix)]
pub fn cancel_on_shutdown(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        warn!(signal = name, "Shutdown requested, cancelling backups");
        cancel.cancel();
    }))
}

#[cfg(not(unix))]
pub fn cancel_on_shutdown(cancel: CancellationToken) -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(signal = "ctrl-c", "Shutdown requested, cancelling backups");
            cancel.cancel();
        }
    }))
}
