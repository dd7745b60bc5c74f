//! Exponential retry schedule for failed outbox deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::runtime::{BackoffJitter, instant_after};

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped.
///
/// # Example
///
/// ```
/// # use booking_relay::domain::outbox::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.base_delay(1), Duration::from_secs(60));
/// assert_eq!(policy.base_delay(3), Duration::from_secs(240));
/// assert_eq!(policy.base_delay(30), Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Growth factor per attempt.
    pub multiplier: u32,
    /// Upper bound before jitter.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(60),
            multiplier: 2,
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    const MIN_DELAY: Duration = Duration::from_millis(1);

    /// Un-jittered delay after failed attempt number `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(factor)).min(max_ms))
    }

    /// Next eligible time after failed attempt `attempt`; always after `now`.
    pub fn next_ready_at(
        &self,
        now: DateTime<Utc>,
        attempt: u32,
        jitter: &dyn BackoffJitter,
    ) -> DateTime<Utc> {
        let delay = jitter
            .jittered_delay(self.base_delay(attempt), attempt)
            .max(Self::MIN_DELAY);
        instant_after(now, delay)
    }
}
