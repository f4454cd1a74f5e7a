use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Outcome of the last attempt made by [`with_timeout_retry`].
#[derive(Debug, Error)]
pub enum AttemptError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Failed(E),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run `op` under `timeout`, retrying once on failure or timeout.
///
/// At most two attempts are made, so the caller is blocked for at most `2 * timeout`.
pub async fn with_timeout_retry<T, E, F, Fut>(
    label: &str,
    timeout: Duration,
    mut op: F,
) -> Result<T, AttemptError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        let err = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut(timeout),
        };
        if attempt >= 2 {
            return Err(err);
        }
        debug!(operation = label, error = %err, "attempt failed, retrying once");
        attempt += 1;
    }
}
