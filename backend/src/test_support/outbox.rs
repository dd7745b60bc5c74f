//! In-memory outbox repository and scripted delivery handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::lock;
use crate::domain::outbox::{
    AttemptResolution, EmitOutcome, NewOutboxEvent, OutboxEvent, OutboxStatus,
};
use crate::domain::ports::{
    OutboxHandler, OutboxHandlerError, OutboxRepository, OutboxRepositoryError,
};

struct StoredEvent {
    event: OutboxEvent,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    rows: Mutex<Vec<StoredEvent>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, event_id: Uuid) -> Option<OutboxEvent> {
        lock(&self.rows)
            .iter()
            .find(|row| row.event.id == event_id)
            .map(|row| row.event.clone())
    }

    pub fn all(&self) -> Vec<OutboxEvent> {
        lock(&self.rows).iter().map(|row| row.event.clone()).collect()
    }
}

fn claim_is_free(row: &StoredEvent, now: DateTime<Utc>, claim_timeout: Duration) -> bool {
    match row.claimed_at {
        None => true,
        Some(at) => {
            let timeout = TimeDelta::from_std(claim_timeout).unwrap_or(TimeDelta::MAX);
            at.checked_add_signed(timeout).is_some_and(|lapse| lapse <= now)
        }
    }
}

fn apply(event: &mut OutboxEvent, resolution: &AttemptResolution) {
    event.status = resolution.status();
    match resolution {
        AttemptResolution::Delivered { attempts, at } => {
            event.attempts = *attempts;
            event.last_attempt_at = Some(*at);
            event.delivered_at = Some(*at);
            event.error_message = None;
        }
        AttemptResolution::Retry {
            attempts,
            at,
            ready_at,
            error,
        } => {
            event.attempts = *attempts;
            event.last_attempt_at = Some(*at);
            event.ready_at = *ready_at;
            event.error_message = Some(error.clone());
        }
        AttemptResolution::Failed {
            attempts,
            at,
            error,
        } => {
            event.attempts = *attempts;
            event.last_attempt_at = Some(*at);
            event.failed_at = Some(*at);
            event.error_message = Some(error.clone());
        }
        AttemptResolution::DeadLettered { at, reason } => {
            event.failed_at = Some(*at);
            event.error_message = Some(reason.clone());
        }
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EmitOutcome, OutboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let duplicate = event.dedupe_key.as_deref().and_then(|key| {
            rows.iter().find(|row| {
                row.event.tenant_id == event.tenant_id
                    && row.event.dedupe_key.as_deref() == Some(key)
            })
        });
        if let Some(existing) = duplicate {
            return Ok(EmitOutcome::Deduplicated(existing.event.id));
        }
        let id = Uuid::new_v4();
        rows.push(StoredEvent {
            event: OutboxEvent {
                id,
                tenant_id: event.tenant_id,
                event_code: event.event_code.clone(),
                payload: event.payload.clone(),
                status: OutboxStatus::Ready,
                ready_at: event.ready_at.unwrap_or(now),
                delivered_at: None,
                failed_at: None,
                attempts: 0,
                max_attempts: event.max_attempts,
                last_attempt_at: None,
                error_message: None,
                dedupe_key: event.dedupe_key.clone(),
                metadata: event.metadata.clone(),
                created_at: now,
            },
            claimed_by: None,
            claimed_at: None,
        });
        Ok(EmitOutcome::Enqueued(id))
    }

    async fn claim_ready(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: u32,
        claim_timeout: Duration,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let mut due: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.event.is_due(now) && claim_is_free(row, now, claim_timeout))
            .map(|(index, _)| index)
            .collect();
        due.sort_by_key(|index| rows[*index].event.ready_at);
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));

        let mut claimed = Vec::with_capacity(due.len());
        for index in due {
            let row = &mut rows[index];
            row.claimed_by = Some(worker_id.to_owned());
            row.claimed_at = Some(now);
            claimed.push(row.event.clone());
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        event_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows.iter_mut().find(|row| {
            row.event.id == event_id
                && row.event.status == OutboxStatus::Ready
                && row.claimed_by.as_deref() == Some(worker_id)
        }) else {
            return Ok(false);
        };
        row.claimed_at = Some(now);
        Ok(true)
    }

    async fn record_outcome(
        &self,
        event_id: Uuid,
        worker_id: &str,
        resolution: &AttemptResolution,
    ) -> Result<(), OutboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.event.id == event_id && row.claimed_by.as_deref() == Some(worker_id))
        else {
            return Err(OutboxRepositoryError::claim_lost(event_id));
        };
        apply(&mut row.event, resolution);
        row.claimed_by = None;
        row.claimed_at = None;
        Ok(())
    }

    async fn find(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxRepositoryError> {
        Ok(self.get(event_id))
    }

    async fn replay(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.event.id == event_id && row.event.status.is_replayable())
        else {
            return Ok(false);
        };
        row.event.status = OutboxStatus::Ready;
        row.event.attempts = 0;
        row.event.ready_at = now;
        row.event.failed_at = None;
        row.event.error_message = None;
        row.claimed_by = None;
        row.claimed_at = None;
        Ok(true)
    }
}

/// Scripted handler behaviour for one call.
#[derive(Debug, Clone)]
pub enum HandlerStep {
    Succeed,
    Fail(String),
    Panic,
    Hang,
}

/// Handler that replays a script of outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedOutboxHandler {
    script: Mutex<VecDeque<HandlerStep>>,
    seen: Mutex<Vec<Uuid>>,
}

impl ScriptedOutboxHandler {
    pub fn new(steps: impl IntoIterator<Item = HandlerStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Handler that fails every call.
    pub fn always_failing(message: &str, times: usize) -> Self {
        Self::new(std::iter::repeat_n(HandlerStep::Fail(message.to_owned()), times))
    }

    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    pub fn seen(&self) -> Vec<Uuid> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl OutboxHandler for ScriptedOutboxHandler {
    async fn handle(&self, event: &OutboxEvent) -> Result<(), OutboxHandlerError> {
        lock(&self.seen).push(event.id);
        let step = lock(&self.script).pop_front().unwrap_or(HandlerStep::Succeed);
        match step {
            HandlerStep::Succeed => Ok(()),
            HandlerStep::Fail(message) => Err(OutboxHandlerError::transport(message)),
            HandlerStep::Panic => panic!("scripted handler panic"),
            HandlerStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Count of handler calls per event id.
pub fn calls_per_event(seen: &[Uuid]) -> HashMap<Uuid, usize> {
    seen.iter().fold(HashMap::new(), |mut counts, id| {
        *counts.entry(*id).or_default() += 1;
        counts
    })
}
