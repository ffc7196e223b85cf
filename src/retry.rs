//! Retry with exponential backoff for completion calls
//!
//! Every external completion call goes through here. Callers decide what to
//! substitute when the final attempt fails.

use crate::settings::Settings;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after every further failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        RetryPolicy {
            max_attempts: settings.retry_attempts,
            base_delay: settings.retry_base_delay(),
        }
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping 2s, 4s, ... between
/// failures. Returns the last error if every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::warn!("[Retry] {} failed after {} attempts: {}", label, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let wait = policy.delay_after(attempt);
                tracing::warn!(
                    "[Retry] {} attempt {}/{} failed, retrying in {}s: {}",
                    label,
                    attempt,
                    max_attempts,
                    wait.as_secs(),
                    e
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::default();

        let seen = calls.clone();
        let result = retry_with_backoff(&policy, "test", move || {
            let seen = seen.clone();
            async move {
                let mut guard = seen.lock().unwrap();
                guard.push(Instant::now());
                if guard.len() < 3 {
                    Err("transient")
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;

        assert_eq!(result, Ok("ok".to_string()));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(2));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_fails_returns_last_error() {
        let count = Arc::new(Mutex::new(0u32));
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let seen = count.clone();
        let result = retry_with_backoff(&policy, "test", move || {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() += 1;
                Err::<String, _>("down")
            }
        })
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(*count.lock().unwrap(), 3);
        // 2s + 4s of backoff, no sleep after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_does_not_sleep() {
        let start = Instant::now();
        let result: Result<u32, String> =
            retry_with_backoff(&RetryPolicy::default(), "test", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
