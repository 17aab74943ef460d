//! Retry-with-backoff helper shared by the master RPC client and the load job's
//! worker dispatch path.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

fn backoff_for_attempt(attempt: u32) -> Duration {
    let millis = 100u64.saturating_mul(1u64 << attempt.min(8));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Retries `op` until it succeeds, `is_permanent` says the error can't be
/// retried, `max_retries` is exhausted, or `cancel` fires.
///
/// Returns `None` only when cancellation fired before any result was
/// obtained.
pub async fn retry<T, O, F, E>(
    mut op: O,
    is_permanent: impl Fn(&E) -> bool,
    warn_threshold: u32,
    max_retries: u32,
    description: &str,
    cancel: &CancellationToken,
) -> Option<Result<T, E>>
where
    O: FnMut() -> F,
    F: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match op().await {
            Ok(v) => return Some(Ok(v)),
            Err(e) if is_permanent(&e) => return Some(Err(e)),
            Err(e) => {
                attempt += 1;
                if attempt >= warn_threshold {
                    warn!(attempt, description, "retrying after error");
                }
                if attempt >= max_retries {
                    return Some(Err(e));
                }
                let sleep = backoff_for_attempt(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = cancel.cancelled() => return None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            },
            |_: &&str| false,
            10,
            5,
            "test op",
            &cancel,
        )
        .await;
        assert_eq!(result, Some(Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("fatal")
            },
            |_: &&str| true,
            10,
            5,
            "test op",
            &cancel,
        )
        .await;
        assert_eq!(result, Some(Err("fatal")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
