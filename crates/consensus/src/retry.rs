//! Exponential backoff for idempotent network operations.

use renderhive_types::error::NetworkError;
use std::future::Future;
use std::time::Duration;

/// Maximum attempts before giving up. Fixed by the coordinator's retry
/// policy, not configuration.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY: Duration = Duration::from_millis(500);

/// Runs `op` up to [`MAX_ATTEMPTS`] times, doubling the delay after each
/// failure. Only use for operations that are safe to repeat.
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> Result<T, NetworkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let mut delay = BASE_DELAY;
    let mut last = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last = e.to_string();
                if attempt < MAX_ATTEMPTS {
                    tracing::warn!(
                        target: "consensus",
                        %label,
                        attempt,
                        error = %last,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(NetworkError::RetriesExhausted {
        attempts: MAX_ATTEMPTS,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(NetworkError::Mirror("not yet".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetworkError::Mirror("down".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(matches!(
            result,
            Err(NetworkError::RetriesExhausted { attempts, .. }) if attempts == MAX_ATTEMPTS
        ));
    }
}
