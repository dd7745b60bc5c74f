//! Time doubles: a settable clock, sleepers and jitter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;

use super::lock;
use crate::domain::{BackoffJitter, Sleeper};

/// Fixed instant used across suites.
pub fn fixed_now() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).single() {
        Some(now) => now,
        None => panic!("fixed timestamp is valid"),
    }
}

/// Wall clock the test drives by hand. Shared with the service under test
/// through `Arc`, so lease expiry and retry readiness can be stepped over
/// without real waiting.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: Duration) {
        let step = TimeDelta::from_std(by).expect("test durations fit in a TimeDelta");
        let mut now = lock(&self.0);
        *now = *now + step;
    }

    /// Jump straight to `now`, e.g. an outbox row's `ready_at`.
    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.0) = now;
    }
}

impl Default for MutableClock {
    fn default() -> Self {
        Self::new(fixed_now())
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        Local.from_utc_datetime(&self.utc().naive_utc())
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSleeper;

#[async_trait]
impl Sleeper for ImmediateSleeper {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Default)]
pub struct RecordingSleeper(pub Mutex<Vec<Duration>>);

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        lock(&self.0).push(duration);
    }
}

/// Sleeper that moves a [`MutableClock`] forward instead of waiting, and
/// yields so concurrent tasks can make progress.
pub struct AdvancingSleeper(pub Arc<MutableClock>);

#[async_trait]
impl Sleeper for AdvancingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32) -> Duration {
        base
    }
}
