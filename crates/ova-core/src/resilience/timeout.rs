//! Wall-clock bounds for a single provider call.
//!
//! The guard only bounds how long the caller waits. Blocking work handed to
//! [`guard_blocking`] keeps running on its worker thread after a timeout.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Await `fut` for at most `limit`.
pub async fn guard<T, Fut>(limit: Duration, fut: Fut) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

/// Run a synchronous call on the blocking pool so it cannot stall the
/// scheduler, waiting at most `limit` for it.
pub async fn guard_blocking<T, F>(limit: Duration, f: F) -> Result<T, ProviderError>
where
    F: FnOnce() -> Result<T, ProviderError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ProviderError::Other(format!("blocking call panicked: {}", join_err))),
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_guard_times_out() {
        let result: Result<(), _> = guard(Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        match result {
            Err(ProviderError::Timeout(d)) => assert_eq!(d, Duration::from_secs(30)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let ok = guard(Duration::from_secs(1), async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<(), _> =
            guard(Duration::from_secs(1), async { Err(ProviderError::Parse("x".into())) }).await;
        assert!(matches!(err, Err(ProviderError::Parse(_))));
    }

    #[tokio::test]
    async fn test_guard_blocking_runs_off_thread() {
        let value = guard_blocking(Duration::from_secs(5), || Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_guard_blocking_timeout() {
        let result: Result<(), _> = guard_blocking(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
