//! Guard timings: replay window, claim lease and the concurrent-duplicate wait.
//!
//! Read from the environment through [`mockable::Env`] so tests can supply
//! values without touching the process environment. Unparseable values fall
//! back to the default; out-of-range values are clamped.

use std::time::Duration;

use mockable::{DefaultEnv, Env};

/// Hours a completed response is replayed. Default 24, clamped to 1..=87600.
pub const IDEMPOTENCY_TTL_HOURS_ENV: &str = "IDEMPOTENCY_TTL_HOURS";
/// Seconds an unfinished claim blocks others. Default 60, clamped to 1..=3600.
pub const IDEMPOTENCY_LEASE_SECS_ENV: &str = "IDEMPOTENCY_LEASE_SECS";
/// Milliseconds a duplicate waits for the holder. Default 5000, clamped to 0..=30000.
pub const IDEMPOTENCY_MAX_WAIT_MS_ENV: &str = "IDEMPOTENCY_MAX_WAIT_MS";

const DEFAULT_TTL_HOURS: u64 = 24;
const TTL_HOURS: (u64, u64) = (1, 24 * 365 * 10);
const DEFAULT_LEASE_SECS: u64 = 60;
const LEASE_SECS: (u64, u64) = (1, 3600);
const DEFAULT_MAX_WAIT_MS: u64 = 5_000;
const MAX_WAIT_MS: (u64, u64) = (0, 30_000);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timings for [`IdempotencyGuard`](super::IdempotencyGuard).
///
/// A completed response is replayed for `ttl`. A claim that never finishes
/// blocks the key for `in_progress_lease`, after which another request may
/// take it over. A duplicate arriving while the key is held re-checks every
/// `poll_interval` and gives up with a 409 after `max_wait`.
///
/// ```
/// # use booking_relay::domain::idempotency::IdempotencyConfig;
/// # use std::time::Duration;
/// let config = IdempotencyConfig::default();
/// assert_eq!(config.ttl(), Duration::from_secs(24 * 3600));
///
/// let custom = IdempotencyConfig::with_ttl(Duration::from_secs(12 * 3600))
///     .with_max_wait(Duration::from_millis(200));
/// assert_eq!(custom.max_wait(), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
    in_progress_lease: Duration,
    poll_interval: Duration,
    max_wait: Duration,
}

fn bounded(env: &impl Env, name: &str, default: u64, (min, max): (u64, u64)) -> u64 {
    env.string(name)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

impl IdempotencyConfig {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_env_with(&DefaultEnv::new())
    }

    pub fn from_env_with(env: &impl Env) -> Self {
        let hours = bounded(env, IDEMPOTENCY_TTL_HOURS_ENV, DEFAULT_TTL_HOURS, TTL_HOURS);
        let lease = bounded(env, IDEMPOTENCY_LEASE_SECS_ENV, DEFAULT_LEASE_SECS, LEASE_SECS);
        let wait = bounded(env, IDEMPOTENCY_MAX_WAIT_MS_ENV, DEFAULT_MAX_WAIT_MS, MAX_WAIT_MS);
        Self::with_ttl(Duration::from_secs(hours * 3600))
            .with_in_progress_lease(Duration::from_secs(lease))
            .with_max_wait(Duration::from_millis(wait))
    }

    /// Default lease and waits with an explicit replay window.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            in_progress_lease: Duration::from_secs(DEFAULT_LEASE_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
        }
    }

    #[must_use]
    pub fn with_in_progress_lease(mut self, lease: Duration) -> Self {
        self.in_progress_lease = lease;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn in_progress_lease(&self) -> Duration {
        self.in_progress_lease
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_HOURS * 3600))
    }
}
