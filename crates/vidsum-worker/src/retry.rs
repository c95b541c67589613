//! Bounded retry for flaky background operations against Redis
//! (lease heartbeats, housekeeping writes).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Ceiling on the pause between tries.
const MAX_PAUSE: Duration = Duration::from_secs(5);

/// Run `op` up to `tries` times, doubling the pause between attempts.
///
/// The pause starts at `first_pause` and is capped at [`MAX_PAUSE`].
/// Returns the last error once the budget is spent.
pub async fn with_backoff<F, Fut, T, E>(
    name: &str,
    tries: u32,
    first_pause: Duration,
    op: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let tries = tries.max(1);
    let mut pause = first_pause;
    let mut used = 0u32;

    loop {
        used += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if used < tries => {
                debug!(
                    op = name,
                    used,
                    tries,
                    pause_ms = pause.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(pause).await;
                pause = pause.saturating_mul(2).min(MAX_PAUSE);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_success_uses_one_try() {
        let calls = AtomicU32::new(0);

        let result = with_backoff("test", 3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_within_budget() {
        let calls = AtomicU32::new(0);

        let result = with_backoff("test", 3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_backoff("test", 2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always") }
        })
        .await;

        assert_eq!(result.unwrap_err(), "always");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_tries_still_runs_once() {
        let result = with_backoff("test", 0, Duration::from_millis(1), || async {
            Ok::<_, String>(1)
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
