//! Exponential backoff for transient store failures.
//!
//! Callers decide whether an operation is worth retrying; the store never
//! retries on its own.
//!
//! ```ignore
//! let markers = backoff::retry(3, || store.query_range(&query)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::StoreError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Runs `operation`, retrying up to `max_retries` times on transient
/// errors (see [`StoreError::is_transient`]).
///
/// Waits 2s, 4s, 8s, ... between attempts.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// retries are exhausted.
pub async fn retry<T, F, Fut>(max_retries: u32, mut operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                let delay = Duration::from_secs(1u64 << attempt);
                log::warn!("  transient store error: {e}");
                log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn unavailable() -> StoreError {
        StoreError::Unavailable {
            message: "offline".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(unavailable()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(unavailable()) }
        })
        .await;

        assert_eq!(result, Err(unavailable()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Cancelled) }
        })
        .await;

        assert_eq!(result, Err(StoreError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
