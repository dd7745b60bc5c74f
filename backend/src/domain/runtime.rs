//! Runtime seams shared by the relay services: sleeping and backoff jitter.
//!
//! Both are traits so tests can run retry and polling loops without real time
//! passing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// Async sleep abstraction used while polling and between retries.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Jitter strategy applied on top of an exponential base delay.
pub trait BackoffJitter: Send + Sync {
    /// Return the delay to use for `attempt` given the un-jittered `base`.
    ///
    /// ```rust
    /// use booking_relay::domain::BackoffJitter;
    /// use std::time::Duration;
    ///
    /// struct Fixed;
    /// impl BackoffJitter for Fixed {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt))
    ///     }
    /// }
    ///
    /// assert_eq!(
    ///     Fixed.jittered_delay(Duration::from_secs(1), 2),
    ///     Duration::from_millis(1_002),
    /// );
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32) -> Duration;
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds between 0 and 25 % of the base delay, chosen uniformly at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = base_ms / 4;
        let extra = if max_extra == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_extra)
        };
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}

/// `now + delay`, saturating at the latest representable instant.
pub(crate) fn instant_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
