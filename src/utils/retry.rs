// Retry utilities

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Linear backoff: the k-th retry (1-based) waits `base + (k - 1) * increment`.
///
/// `max_attempts` counts every probe including the first, so a policy of 8
/// attempts sleeps at most 7 times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    max_attempts: u32,
    base_delay: Duration,
    increment: Duration,
}

impl LinearBackoff {
    pub fn new(max_attempts: u32, base_delay: Duration, increment: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            increment,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay + self.increment * retry.saturating_sub(1)
    }

    /// All delays the policy can produce, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|retry| self.delay_for(retry))
    }

    /// Total time spent sleeping before exhaustion is reported.
    pub fn worst_case(&self) -> Duration {
        self.schedule().sum()
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(8, Duration::from_millis(300), Duration::from_millis(200))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("retry cancelled")]
    Cancelled,
}

/// Run `probe` until it yields a value, the policy is exhausted, or `cancel` fires.
///
/// The token is checked before every attempt and raced against every sleep,
/// so no probe runs after cancellation.
pub async fn with_retry<F, T>(
    policy: &LinearBackoff,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Option<T>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
        if let Some(value) = probe(attempt) {
            return Ok(value);
        }

        if attempt >= policy.max_attempts() {
            return Err(RetryError::Exhausted { attempts: attempt });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Probe failed, scheduling retry");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}
