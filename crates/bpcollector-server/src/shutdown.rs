//! Waits for `SIGTERM` or `SIGINT`, used as `axum::serve`'s graceful-shutdown
//! future so in-flight connections finish before the listener closes.

/// Resolves when either signal arrives; on platforms without `SIGTERM`
/// (non-Unix), only `Ctrl-C` is observed.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        #[allow(clippy::expect_used)]
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[allow(clippy::expect_used)]
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
