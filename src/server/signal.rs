//! Signal handling for graceful shutdown.

use tracing::{error, info};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// A signal that cannot be registered is logged and never fires.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::SignalKind;

    tokio::select! {
        _ = wait_for(SignalKind::interrupt(), "SIGINT") => {}
        _ = wait_for(SignalKind::terminate(), "SIGTERM") => {}
        _ = wait_for(SignalKind::quit(), "SIGQUIT") => {}
    }
}

#[cfg(unix)]
async fn wait_for(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
            info!(message = "Signal received.", signal = name);
        }
        Err(e) => {
            error!("Failed to set up {} handler: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "ctrl-c"),
        Err(e) => {
            error!("Failed to set up ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
