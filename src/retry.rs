// Exponential backoff with jitter, plus a generic retry wrapper.
//
// Used in two places: the Jetstream source between reconnect attempts,
// and the push gateway notifier when the gateway answers 429 or 5xx.
// The dispatcher itself never retries.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Backoff parameters: `base * 2^(attempt-1)`, capped at `max`, then jittered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Maximum retry attempts for `with_retry` (ignored by reconnect loops).
    pub max_retries: u32,
}

impl Backoff {
    /// Reconnect schedule for the firehose: 1s doubling to 60s.
    pub const RECONNECT: Backoff = Backoff {
        base: Duration::from_secs(1),
        max: Duration::from_secs(60),
        max_retries: u32::MAX,
    };

    /// Retry schedule for push gateway requests.
    pub const DELIVERY: Backoff = Backoff {
        base: Duration::from_millis(500),
        max: Duration::from_secs(8),
        max_retries: 3,
    };

    /// Un-jittered delay before attempt number `attempt` (1-based).
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Delay before attempt `attempt`, with +/- 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        // Jitter from sub-second clock noise
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0;
        Duration::from_secs_f64(raw.as_secs_f64() * jitter_factor)
    }
}

/// Retry `operation` while `is_retryable` says the error is transient.
///
/// Non-retryable errors return immediately. After `policy.max_retries`
/// retries the last error is returned.
pub async fn with_retry<F, Fut, T, P>(policy: Backoff, is_retryable: P, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt >= policy.max_retries {
                    return Err(err);
                }

                attempt += 1;
                let delay = policy.delay(attempt);

                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
