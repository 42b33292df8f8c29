//! Signal-driven shutdown for the bound listeners.
//!
//! SIGTERM and SIGINT both stop every listener: new connections are
//! refused immediately, established ones get a bounded drain window.

use axum_server::Handle;

/// How long in-flight connections may drain once a signal arrives.
const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Drain every listener when the process receives SIGTERM or SIGINT.
pub fn setup_shutdown_handler(handles: Vec<Handle>) {
    tokio::spawn(async move {
        let interrupt = async {
            tokio::signal::ctrl_c()
                .await
                .expect("ctrl-c handler must install");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler must install")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let signal = tokio::select! {
            _ = interrupt => "SIGINT",
            _ = terminate => "SIGTERM",
        };

        tracing::info!(
            signal,
            listeners = handles.len(),
            grace_secs = SHUTDOWN_GRACE_SECS,
            "Shutdown signal received, draining listeners"
        );

        for handle in &handles {
            handle.graceful_shutdown(Some(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)));
        }
    });
}
