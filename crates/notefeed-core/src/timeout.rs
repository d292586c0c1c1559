use std::future::Future;
use std::time::Duration;

/// Race a future against a wall-clock deadline; first to settle wins.
///
/// `None` means the deadline fired first. The losing operation is not
/// aborted at the protocol level, only the caller stops waiting for it.
pub async fn with_timeout<T>(bound: Duration, fut: impl Future<Output = T>) -> Option<T> {
    tokio::time::timeout(bound, fut).await.ok()
}
