//! Port abstraction for the transactional outbox table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::outbox::{AttemptResolution, EmitOutcome, NewOutboxEvent, OutboxEvent};

use super::define_port_error;

define_port_error! {
    /// Errors raised by outbox repository adapters.
    pub enum OutboxRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String }
            => "outbox store unavailable: {message}" => ServiceUnavailable,
        /// Query or mutation failed during execution.
        Query { message: String } => "outbox store error: {message}" => InternalError,
        /// The worker no longer holds the claim on the event.
        ClaimLost { event_id: Uuid }
            => "outbox event {event_id} is no longer claimed by this worker" => Conflict,
    }
}

/// Port for outbox persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Store a new event, due at `event.ready_at` or `now`.
    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EmitOutcome, OutboxRepositoryError>;

    /// Atomically claim up to `limit` due events for `worker_id`, oldest
    /// `ready_at` first.
    ///
    /// Rows claimed by another worker are skipped unless their claim is older
    /// than `claim_timeout`.
    async fn claim_ready(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: u32,
        claim_timeout: Duration,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError>;

    /// Re-stamp the claim on a ready event just before it is dispatched.
    ///
    /// Returns `false` when `worker_id` no longer holds the row or the row
    /// has left `ready`; the caller must then not dispatch it.
    async fn renew_claim(
        &self,
        event_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError>;

    /// Apply an attempt's outcome and drop the claim.
    ///
    /// Fails with [`OutboxRepositoryError::ClaimLost`] when `worker_id` no
    /// longer holds the row.
    async fn record_outcome(
        &self,
        event_id: Uuid,
        worker_id: &str,
        resolution: &AttemptResolution,
    ) -> Result<(), OutboxRepositoryError>;

    /// Load an event by id.
    async fn find(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxRepositoryError>;

    /// Re-arm a failed or dead-lettered event.
    ///
    /// Returns `false` when the event does not exist or is not replayable.
    async fn replay(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxRepositoryError>;
}
