//! In-memory webhook inbox and a recording handler.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::lock;
use crate::domain::inbox::{NewWebhookInboxEvent, ProviderName, WebhookInboxEvent};
use crate::domain::ports::{
    InboxRepository, InboxRepositoryError, WebhookEventHandler, WebhookHandlerError,
};

#[derive(Default)]
pub struct InMemoryInboxRepository {
    rows: Mutex<Vec<WebhookInboxEvent>>,
}

impl InMemoryInboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<WebhookInboxEvent> {
        lock(&self.rows).clone()
    }

    /// Hold a row's lease until `until`, as another consumer would.
    pub fn hold(&self, id: Uuid, until: DateTime<Utc>) {
        if let Some(row) = lock(&self.rows).iter_mut().find(|row| row.id == id) {
            row.claimed_until = Some(until);
        }
    }
}

fn lease_free(row: &WebhookInboxEvent, now: DateTime<Utc>) -> bool {
    row.claimed_until.is_none_or(|until| until <= now)
}

#[async_trait]
impl InboxRepository for InMemoryInboxRepository {
    async fn insert(&self, event: &NewWebhookInboxEvent) -> Result<bool, InboxRepositoryError> {
        let mut rows = lock(&self.rows);
        if rows.iter().any(|row| {
            row.provider == event.provider && row.provider_event_id == event.provider_event_id
        }) {
            return Ok(false);
        }
        rows.push(WebhookInboxEvent {
            id: Uuid::new_v4(),
            provider: event.provider.clone(),
            provider_event_id: event.provider_event_id.clone(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            received_at: event.received_at,
            processed_at: None,
            claimed_until: None,
            attempts: 0,
            last_error: None,
        });
        Ok(true)
    }

    async fn find(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
    ) -> Result<Option<WebhookInboxEvent>, InboxRepositoryError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|row| &row.provider == provider && row.provider_event_id == provider_event_id)
            .cloned())
    }

    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, InboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && !row.is_processed() && lease_free(row, now))
        else {
            return Ok(false);
        };
        row.claimed_until = Some(until);
        Ok(true)
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, InboxRepositoryError> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && !row.is_processed())
        else {
            return Ok(false);
        };
        row.processed_at = Some(now);
        row.claimed_until = None;
        Ok(true)
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), InboxRepositoryError> {
        if let Some(row) = lock(&self.rows).iter_mut().find(|row| row.id == id) {
            row.attempts = row.attempts.saturating_add(1);
            row.last_error = Some(error.to_owned());
            row.claimed_until = None;
        }
        Ok(())
    }

    async fn list_unprocessed(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookInboxEvent>, InboxRepositoryError> {
        let mut pending: Vec<_> = lock(&self.rows)
            .iter()
            .filter(|row| !row.is_processed() && lease_free(row, now))
            .cloned()
            .collect();
        pending.sort_by_key(|row| row.received_at);
        pending.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(pending)
    }
}

/// Handler that records every event it applies and can fail on demand.
#[derive(Default)]
pub struct RecordingWebhookHandler {
    failures: Mutex<VecDeque<String>>,
    applied: Mutex<Vec<(String, String)>>,
}

impl RecordingWebhookHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls with `message`.
    pub fn failing(message: &str, times: usize) -> Self {
        Self {
            failures: Mutex::new(std::iter::repeat_n(message.to_owned(), times).collect()),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// (provider event id, event type) pairs applied so far.
    pub fn applied(&self) -> Vec<(String, String)> {
        lock(&self.applied).clone()
    }
}

#[async_trait]
impl WebhookEventHandler for RecordingWebhookHandler {
    async fn handle(&self, event: &WebhookInboxEvent) -> Result<(), WebhookHandlerError> {
        if let Some(message) = lock(&self.failures).pop_front() {
            return Err(WebhookHandlerError::transient(message));
        }
        lock(&self.applied).push((event.provider_event_id.clone(), event.event_type.clone()));
        Ok(())
    }
}
