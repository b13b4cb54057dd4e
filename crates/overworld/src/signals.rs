//! Waiting for the operator to stop the server.

use tracing::info;

/// Resolves on the first SIGINT or SIGTERM, or on Ctrl+C where Unix
/// signals do not exist.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    };
    info!("📡 Received {}, stopping", name);
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("📡 Received Ctrl+C, stopping");
    Ok(())
}
