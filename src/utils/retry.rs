use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff: the delay after failed attempt `n` (0-based) is
/// `base * 2^n`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
        }
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

pub async fn retry_with_backoff<T, E, Op, Fut>(
    policy: RetryPolicy,
    label: &str,
    op: Op,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_sleeper(policy, label, op, tokio::time::sleep).await
}

pub async fn retry_with_sleeper<T, E, Op, Fut, Sleep, SleepFut>(
    policy: RetryPolicy,
    label: &str,
    mut op: Op,
    mut sleep: Sleep,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Sleep: FnMut(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts {
                    warn!("{label} failed after {max_attempts} attempt(s): {err}");
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    "{label} attempt {}/{} failed: {err}; retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const POLICY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));

    #[test]
    fn delays_double_per_attempt() {
        assert_eq!(POLICY.delay_for(0), Duration::from_secs(1));
        assert_eq!(POLICY.delay_for(1), Duration::from_secs(2));
        assert_eq!(POLICY.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_with_increasing_delays() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0usize));

        let recorded = delays.clone();
        let counter = attempts.clone();
        let result: Result<&str, String> = retry_with_sleeper(
            POLICY,
            "flaky upload",
            move |attempt| {
                *counter.lock() += 1;
                async move {
                    if attempt < 2 {
                        Err(format!("boom {attempt}"))
                    } else {
                        Ok("file-id")
                    }
                }
            },
            move |delay| {
                recorded.lock().push(delay);
                async {}
            },
        )
        .await;

        assert_eq!(result.unwrap(), "file-id");
        assert_eq!(*attempts.lock(), 3);
        let delays = delays.lock().clone();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let attempts = Arc::new(Mutex::new(0usize));
        let counter = attempts.clone();
        let result: Result<(), String> = retry_with_sleeper(
            POLICY,
            "always failing",
            move |attempt| {
                *counter.lock() += 1;
                async move { Err(format!("failure {attempt}")) }
            },
            |_| async {},
        )
        .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(*attempts.lock(), 3);
    }
}
