use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay schedule for retried requests: ramps linearly from `step` up to
/// `cap`, then stays there.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    step: Duration,
    cap: Duration,
}

impl Backoff {
    #[must_use]
    pub const fn new(step: Duration, cap: Duration) -> Self {
        Self { step, cap }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }
}

impl Default for Backoff {
    /// 2s, 4s, 6s, 8s, then 10s.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(10))
    }
}

/// Run `operation` up to `attempts` times, sleeping per `backoff` between
/// failures. Returns the first success or the last error.
pub async fn retry<F, Fut, T, E>(mut operation: F, attempts: u32, backoff: Backoff) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                let delay = backoff.delay(attempt);
                warn!(
                    "Request failed (attempt {attempt}/{attempts}): {err}. Retrying in {}s...",
                    delay.as_secs()
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INSTANT: Backoff = Backoff::new(Duration::ZERO, Duration::ZERO);

    #[test]
    fn delays_ramp_and_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(6));
        assert_eq!(backoff.delay(9), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result = retry(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
            4,
            INSTANT,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, String> = retry(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                        Err(String::from("flaky"))
                    } else {
                        Ok(7)
                    }
                }
            },
            4,
            INSTANT,
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_the_last_error_when_exhausted() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let result: Result<(), String> = retry(
            || {
                let attempts = Arc::clone(&attempts);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            },
            3,
            INSTANT,
        )
        .await;
        assert_eq!(result, Err(String::from("failure 3")));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
