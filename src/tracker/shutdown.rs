use tokio::select;
use tokio_util::sync::CancellationToken;

/// Waits for Ctrl-C and cancels `cancelation`. Returns early if the token gets cancelled
/// elsewhere.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
