//! Port abstraction for the webhook inbox table.
//!
//! The unique (provider, provider event id) constraint absorbs provider
//! redeliveries; the `claimed_until` lease serialises concurrent consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::inbox::{NewWebhookInboxEvent, ProviderName, WebhookInboxEvent};

use super::define_port_error;

define_port_error! {
    /// Errors raised by inbox repository adapters.
    pub enum InboxRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String }
            => "inbox store unavailable: {message}" => ServiceUnavailable,
        /// Query or mutation failed during execution.
        Query { message: String } => "inbox store error: {message}" => InternalError,
    }
}

/// Port for inbox persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InboxRepository: Send + Sync {
    /// Insert unless the (provider, event id) pair exists. Returns whether a
    /// row was written.
    async fn insert(&self, event: &NewWebhookInboxEvent) -> Result<bool, InboxRepositoryError>;

    /// Load a row by its natural key.
    async fn find(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
    ) -> Result<Option<WebhookInboxEvent>, InboxRepositoryError>;

    /// Take the processing lease on an unprocessed row whose lease is free or
    /// lapsed at `now`.
    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, InboxRepositoryError>;

    /// Set `processed_at` on an unprocessed row and drop its lease.
    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, InboxRepositoryError>;

    /// Count a failed attempt, keep the row unprocessed and drop its lease.
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), InboxRepositoryError>;

    /// Unprocessed rows with a free or lapsed lease, oldest first.
    async fn list_unprocessed(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookInboxEvent>, InboxRepositoryError>;
}
