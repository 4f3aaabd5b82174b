//! Shared "at most once, with jitter" retry helper (spec §7 propagation policy).
//!
//! Used by the Chat Engine's LLM call site for transport/5xx failures, and by the
//! Session Store for read-only DB retries. Business-logic failures never pass
//! through this helper — only infrastructure failures the caller knows are safe
//! to repeat once.

use std::future::Future;
use std::time::Duration;

/// Runs `op` once; on failure, sleeps `base_delay` plus up to `base_delay / 2` of
/// jitter, then runs it exactly one more time. Never retries a third time — the
/// spec fixes "at most one retry" as the single policy (§9 Open Question).
pub async fn retry_once_with_jitter<F, Fut, T, E>(base_delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(_first_err) => {
            tokio::time::sleep(jittered(base_delay)).await;
            op().await
        }
    }
}

/// Adds up to 50% jitter to `base` using a cheap, non-cryptographic PRNG seeded
/// from the current time's subsecond nanoseconds — avoids pulling in a `rand`
/// dependency the teacher crate does not otherwise need.
fn jittered(base: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let jitter_fraction = (nanos % 1000) as f64 / 1000.0 * 0.5;
    base + Duration::from_secs_f64(base.as_secs_f64() * jitter_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_once_with_jitter(Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exactly_once_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_once_with_jitter(Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_once_with_jitter(Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err("boom") } else { Ok(7) } }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
