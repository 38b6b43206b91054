//! Signal handling for graceful shutdown.
//!
//! The first signal stops the tick driver and unloads every map. A second
//! signal while that is still running exits immediately.

use map_server::ShutdownState;
use tokio::signal;
use tracing::info;

/// Resolves on SIGINT or SIGTERM (Ctrl+C on Windows).
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}

/// Waits for a termination signal, then initiates shutdown on `state`.
pub async fn shutdown_on_signal(state: &ShutdownState) -> std::io::Result<()> {
    wait_for_signal().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    state.initiate_shutdown();
    Ok(())
}
