//! Fixed-delay retry and polling helpers.

use cachegate_core::CoreResult;
use std::future::Future;
use std::time::Duration;

/// Run `op` until it succeeds, retrying up to `retries` more times with
/// `delay` between attempts. The last error is returned.
pub async fn retry_with_delay<T, F, Fut>(
    what: &str,
    delay: Duration,
    retries: u32,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    what,
                    attempt,
                    retries,
                    error = %e,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Poll `probe` every `interval` until it returns `true`, at most
/// `attempts` times. Returns whether the condition was met.
pub async fn wait_until<F, Fut>(interval: Duration, attempts: u32, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..attempts.max(1) {
        if probe().await {
            return true;
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegate_core::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = retry_with_delay("op", Duration::from_secs(2), 3, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::unavailable("down"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: CoreResult<()> = retry_with_delay("op", Duration::from_millis(10), 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::unavailable("down"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until() {
        let calls = AtomicU32::new(0);
        assert!(
            wait_until(Duration::from_secs(1), 5, || async {
                calls.fetch_add(1, Ordering::SeqCst) == 2
            })
            .await
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert!(!wait_until(Duration::from_secs(1), 2, || async { false }).await);
    }
}
