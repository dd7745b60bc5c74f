//! Retention sweeper for the idempotency cache.
//!
//! Only idempotency rows are ever deleted; outbox and inbox rows are kept for
//! audit and replay.

use std::sync::Arc;

use mockable::Clock;
use tracing::{debug, info};

use super::Error;
use super::ports::IdempotencyRepository;

/// Deletes idempotency rows whose `expires_at` has passed.
pub struct RetentionSweeper {
    repository: Arc<dyn IdempotencyRepository>,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    /// Create a sweeper.
    pub fn new(repository: Arc<dyn IdempotencyRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Delete every row with `expires_at < now`; returns the count.
    pub async fn sweep(&self) -> Result<u64, Error> {
        let now = self.clock.utc();
        let deleted = self
            .repository
            .delete_expired(now)
            .await
            .map_err(Error::from)?;
        if deleted > 0 {
            info!(deleted, "expired idempotency keys swept");
        } else {
            debug!("no expired idempotency keys");
        }
        Ok(deleted)
    }
}
