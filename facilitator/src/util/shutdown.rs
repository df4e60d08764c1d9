//! Shutdown coordination.
//!
//! The HTTP server and the settlement scheduler both observe one
//! cancellation token, raised on SIGTERM or SIGINT. The scheduler finishes
//! any in-flight settlement before exiting.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Registers the Unix shutdown signals and returns the token they raise.
pub fn shutdown_token() -> Result<CancellationToken, std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = CancellationToken::new();
    let raised = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            _ = sigint.recv() => tracing::info!("SIGINT received"),
        }
        raised.cancel();
    });
    Ok(token)
}
