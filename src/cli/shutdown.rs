use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `cancelation` on ctrl-c. Returns early when something else cancelled it first.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}
