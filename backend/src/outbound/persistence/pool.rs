//! The single `bb8` pool of `diesel-async` PostgreSQL connections behind the
//! idempotency, outbox and inbox stores.
//!
//! The relay's job loops and its HTTP workers compete for the same
//! connections, so checkouts are bounded by a short timeout: a guard that
//! cannot reach the store answers 503 quickly instead of holding the request.
//! A timed-out checkout surfaces as [`PoolError::Checkout`], which each store
//! maps to its port's connection error.

use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};

const DEFAULT_MAX_SIZE: u32 = 10;
const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// A checked-out relay connection.
pub type RelayConnection<'a> = PooledConnection<'a, AsyncPgConnection>;

/// Failures raised by the pool itself, before any query runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No connection became free within the checkout timeout.
    #[error("no database connection available: {message}")]
    Checkout { message: String },

    /// The pool could not be created, or its settings are unusable.
    #[error("database pool could not be built: {message}")]
    Build { message: String },
}

impl PoolError {
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Sizing and timeouts for [`DbPool`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use booking_relay::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new("postgres://relay@localhost/relay")
///     .with_max_size(20)
///     .with_checkout_timeout(Duration::from_secs(2));
/// assert_eq!(config.database_url(), "postgres://relay@localhost/relay");
/// assert_eq!(config.max_size(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    checkout_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Ten connections, no idle floor, a five second checkout timeout and
    /// idle connections recycled after ten minutes.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: DEFAULT_MAX_SIZE,
            min_idle: None,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Keep this many connections open even when the relay is quiet.
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// `None` keeps idle connections open indefinitely.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Reject settings bb8 would panic on or silently ignore.
    fn validate(&self) -> Result<(), PoolError> {
        if self.database_url.trim().is_empty() {
            return Err(PoolError::build("database url is empty"));
        }
        if self.max_size == 0 {
            return Err(PoolError::build("max_size must be at least 1"));
        }
        match self.min_idle {
            Some(min_idle) if min_idle > self.max_size => {
                return Err(PoolError::build(format!(
                    "min_idle {min_idle} exceeds max_size {}",
                    self.max_size
                )));
            }
            _ => {}
        }
        if self.checkout_timeout.is_zero() {
            return Err(PoolError::build("checkout timeout must be positive"));
        }
        Ok(())
    }
}

/// Point-in-time pool occupancy, logged at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub connections: u32,
    pub idle: u32,
}

/// Cloneable handle to the shared pool.
///
/// ```ignore
/// let pool = DbPool::new(PoolConfig::new(&settings.database_url)).await?;
/// let outbox = DieselOutboxRepository::new(pool.clone());
/// let inbox = DieselInboxRepository::new(pool);
/// ```
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Build the pool, opening `min_idle` connections eagerly.
    ///
    /// # Errors
    ///
    /// [`PoolError::Build`] when the configuration is invalid or the initial
    /// connections cannot be established.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.database_url);
        let inner = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.checkout_timeout)
            .idle_timeout(config.idle_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;
        Ok(Self { inner })
    }

    /// Check out a connection.
    ///
    /// # Errors
    ///
    /// [`PoolError::Checkout`] when none frees up within the checkout timeout.
    pub async fn get(&self) -> Result<RelayConnection<'_>, PoolError> {
        self.inner
            .get()
            .await
            .map_err(|err| PoolError::checkout(err.to_string()))
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            connections: state.connections,
            idle: state.idle_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const URL: &str = "postgres://relay@localhost/relay";

    #[rstest]
    fn defaults_favour_fast_failure() {
        let config = PoolConfig::new(URL);

        assert_eq!(config.max_size(), DEFAULT_MAX_SIZE);
        assert_eq!(config.min_idle, None);
        assert_eq!(config.checkout_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(600)));
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::empty_url(PoolConfig::new("  "), "database url")]
    #[case::no_connections(PoolConfig::new(URL).with_max_size(0), "max_size")]
    #[case::idle_above_max(
        PoolConfig::new(URL).with_max_size(2).with_min_idle(Some(3)),
        "min_idle 3 exceeds max_size 2"
    )]
    #[case::zero_timeout(
        PoolConfig::new(URL).with_checkout_timeout(Duration::ZERO),
        "checkout timeout"
    )]
    fn unusable_settings_are_rejected(#[case] config: PoolConfig, #[case] expected: &str) {
        let err = config.validate().expect_err("config should be rejected");

        assert!(matches!(err, PoolError::Build { .. }));
        assert!(err.to_string().contains(expected), "got {err}");
    }

    #[rstest]
    #[tokio::test]
    async fn invalid_settings_fail_before_connecting() {
        let result = DbPool::new(PoolConfig::new(URL).with_max_size(0)).await;

        assert!(matches!(result, Err(PoolError::Build { .. })));
    }

    #[rstest]
    fn idle_floor_may_equal_max_size() {
        let config = PoolConfig::new(URL)
            .with_max_size(4)
            .with_min_idle(Some(4))
            .with_idle_timeout(None);

        assert!(config.validate().is_ok());
    }
}
