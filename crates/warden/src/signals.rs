//! Shutdown signal wiring.
//!
//! The control plane supervises child processes, so it must not die to a
//! plain SIGTERM without first stopping them; `main` drives that teardown
//! after this future resolves.

use tokio::signal;
use tracing::info;

/// Resolves once a termination request arrives: SIGINT or SIGTERM on Unix,
/// Ctrl+C elsewhere.
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!("📡 SIGINT received"),
            _ = sigterm.recv() => info!("📡 SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("📡 Ctrl+C received");
    }

    Ok(())
}
