//! Batch worker driving outbox events to a terminal state.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use mockable::Clock;
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AttemptResolution, EmitOutcome, NewOutboxEvent, OutboxEvent, OutboxHandlers, RetryPolicy};
use crate::domain::Error;
use crate::domain::ports::{OutboxRepository, OutboxRepositoryError};
use crate::domain::runtime::{BackoffJitter, RandomJitter};

/// Publisher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxPublisherConfig {
    /// Identifier stamped on claimed rows.
    pub worker_id: String,
    /// Rows claimed per cycle.
    pub batch_size: u32,
    /// Claims older than this are considered abandoned.
    pub claim_timeout: Duration,
    /// Upper bound on a single handler call.
    pub handler_timeout: Duration,
    /// Backoff between failed attempts.
    pub retry: RetryPolicy,
}

impl OutboxPublisherConfig {
    /// Defaults for the given worker id.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            batch_size: 50,
            claim_timeout: Duration::from_secs(300),
            handler_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Check that a row being dispatched cannot go stale mid-call.
    ///
    /// Claims are re-stamped right before each dispatch, so the claim
    /// timeout only has to outlast one handler call.
    pub fn validate(&self) -> Result<(), OutboxConfigError> {
        if self.claim_timeout <= self.handler_timeout {
            return Err(OutboxConfigError::ClaimTimeoutTooShort {
                claim_timeout: self.claim_timeout,
                handler_timeout: self.handler_timeout,
            });
        }
        Ok(())
    }
}

/// Rejected publisher tuning.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum OutboxConfigError {
    #[error(
        "claim timeout {claim_timeout:?} must exceed handler timeout {handler_timeout:?}"
    )]
    ClaimTimeoutTooShort {
        claim_timeout: Duration,
        handler_timeout: Duration,
    },
}

/// Counts from one publisher cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows claimed.
    pub claimed: usize,
    /// Rows delivered.
    pub delivered: usize,
    /// Rows re-armed for a later attempt.
    pub retried: usize,
    /// Rows that exhausted their budget.
    pub failed: usize,
    /// Rows with no handler.
    pub dead_lettered: usize,
    /// Rows another worker took over before dispatch.
    pub skipped: usize,
}

impl BatchReport {
    fn tally(&mut self, resolution: &AttemptResolution) {
        match resolution {
            AttemptResolution::Delivered { .. } => self.delivered += 1,
            AttemptResolution::Retry { .. } => self.retried += 1,
            AttemptResolution::Failed { .. } => self.failed += 1,
            AttemptResolution::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

/// Outbox publisher service.
pub struct OutboxPublisher {
    repository: Arc<dyn OutboxRepository>,
    handlers: OutboxHandlers,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn BackoffJitter>,
    config: OutboxPublisherConfig,
}

impl OutboxPublisher {
    /// Create a publisher with random backoff jitter.
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        handlers: OutboxHandlers,
        clock: Arc<dyn Clock>,
        config: OutboxPublisherConfig,
    ) -> Self {
        Self {
            repository,
            handlers,
            clock,
            jitter: Arc::new(RandomJitter),
            config,
        }
    }

    /// Replace the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn BackoffJitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Emit an event outside any caller transaction.
    ///
    /// Callers that write domain state should prefer the persistence
    /// adapter's in-transaction emit so the event and the write commit
    /// together.
    pub async fn emit(&self, event: &NewOutboxEvent) -> Result<EmitOutcome, Error> {
        let outcome = self
            .repository
            .enqueue(event, self.clock.utc())
            .await
            .map_err(Error::from)?;
        debug!(
            tenant_id = %event.tenant_id,
            event_code = %event.event_code,
            event_id = %outcome.event_id(),
            deduplicated = matches!(outcome, EmitOutcome::Deduplicated(_)),
            "outbox event emitted"
        );
        Ok(outcome)
    }

    /// Claim one batch of due events and attempt each.
    ///
    /// Each outcome is committed on its own, so one failure never undoes
    /// another event's delivery.
    pub async fn run_batch(&self) -> Result<BatchReport, Error> {
        let now = self.clock.utc();
        let events = self
            .repository
            .claim_ready(
                &self.config.worker_id,
                now,
                self.config.batch_size,
                self.config.claim_timeout,
            )
            .await
            .map_err(Error::from)?;

        let mut report = BatchReport {
            claimed: events.len(),
            ..BatchReport::default()
        };
        for event in events {
            if !self.still_claimed(&event).await {
                report.skipped += 1;
                continue;
            }
            let resolution = self.attempt(&event).await;
            match self
                .repository
                .record_outcome(event.id, &self.config.worker_id, &resolution)
                .await
            {
                Ok(()) => report.tally(&resolution),
                Err(OutboxRepositoryError::ClaimLost { event_id }) => {
                    warn!(%event_id, "outbox claim lost before outcome was recorded");
                }
                Err(err) => {
                    error!(event_id = %event.id, error = %err, "failed to record outbox outcome");
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                delivered = report.delivered,
                retried = report.retried,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                skipped = report.skipped,
                "outbox batch processed"
            );
        }
        Ok(report)
    }

    /// Re-arm a failed or dead-lettered event for immediate delivery.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown ids, `conflict` when the event is ready or
    /// delivered.
    pub async fn replay(&self, event_id: Uuid) -> Result<(), Error> {
        let replayed = self
            .repository
            .replay(event_id, self.clock.utc())
            .await
            .map_err(Error::from)?;
        if replayed {
            info!(%event_id, "outbox event replayed");
            return Ok(());
        }
        match self
            .repository
            .find(event_id)
            .await
            .map_err(Error::from)?
        {
            None => Err(Error::not_found(format!("outbox event {event_id} not found"))),
            Some(event) => Err(Error::conflict(format!(
                "outbox event {event_id} is {} and cannot be replayed",
                event.status
            ))),
        }
    }

    async fn still_claimed(&self, event: &OutboxEvent) -> bool {
        match self
            .repository
            .renew_claim(event.id, &self.config.worker_id, self.clock.utc())
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!(event_id = %event.id, "outbox claim lost before dispatch; skipping");
                false
            }
            Err(err) => {
                error!(event_id = %event.id, error = %err, "failed to renew outbox claim");
                false
            }
        }
    }

    async fn attempt(&self, event: &OutboxEvent) -> AttemptResolution {
        let Some(category) = event.event_code.category() else {
            return self.dead_letter(event, format!("unknown event code {}", event.event_code));
        };
        let Some(handler) = self.handlers.for_category(category) else {
            return self.dead_letter(
                event,
                format!("no handler registered for {category} events"),
            );
        };

        let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
        let result = tokio::time::timeout(self.config.handler_timeout, call).await;
        let now = self.clock.utc();
        let attempts = event.attempts.saturating_add(1);
        let error = match result {
            Ok(Ok(Ok(()))) => {
                debug!(event_id = %event.id, event_code = %event.event_code, "outbox event delivered");
                return AttemptResolution::Delivered { attempts, at: now };
            }
            Ok(Ok(Err(err))) => err.to_string(),
            Ok(Err(_)) => "outbox handler panicked".to_owned(),
            Err(_) => format!(
                "outbox handler timed out after {}ms",
                self.config.handler_timeout.as_millis()
            ),
        };
        self.failure(event, attempts, now, error)
    }

    fn failure(
        &self,
        event: &OutboxEvent,
        attempts: u32,
        now: DateTime<Utc>,
        error: String,
    ) -> AttemptResolution {
        if attempts >= event.max_attempts {
            warn!(
                event_id = %event.id,
                event_code = %event.event_code,
                attempts,
                error = %error,
                "outbox event failed permanently"
            );
            return AttemptResolution::Failed {
                attempts,
                at: now,
                error,
            };
        }
        let ready_at = self
            .config
            .retry
            .next_ready_at(now, attempts, self.jitter.as_ref());
        debug!(
            event_id = %event.id,
            attempts,
            %ready_at,
            error = %error,
            "outbox event scheduled for retry"
        );
        AttemptResolution::Retry {
            attempts,
            at: now,
            ready_at,
            error,
        }
    }

    fn dead_letter(&self, event: &OutboxEvent, reason: String) -> AttemptResolution {
        warn!(
            event_id = %event.id,
            event_code = %event.event_code,
            reason = %reason,
            "outbox event dead-lettered"
        );
        AttemptResolution::DeadLettered {
            at: self.clock.utc(),
            reason,
        }
    }
}

