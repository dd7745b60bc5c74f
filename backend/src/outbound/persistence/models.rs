//! Internal Diesel row structs for database operations.
//!
//! These types are implementation details of the persistence layer and must
//! never be exposed to the domain.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{idempotency_keys, outbox_events, webhook_inbox_events};

// ---------------------------------------------------------------------------
// Idempotency key models
// ---------------------------------------------------------------------------

/// Row struct for reading from the idempotency_keys table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = idempotency_keys)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct IdempotencyKeyRow {
    pub tenant_id: Uuid,
    pub key_hash: String,
    pub original_key: String,
    pub endpoint: String,
    pub http_method: String,
    pub request_hash: Vec<u8>,
    pub state: String,
    pub response_status: Option<i32>,
    pub response_body: Option<Vec<u8>>,
    pub response_headers: serde_json::Value,
    pub locked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insertable in-progress placeholder.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = idempotency_keys)]
pub(crate) struct NewIdempotencyKeyRow<'a> {
    pub tenant_id: Uuid,
    pub key_hash: &'a str,
    pub original_key: &'a str,
    pub endpoint: &'a str,
    pub http_method: &'a str,
    pub request_hash: &'a [u8],
    pub state: &'a str,
    pub locked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outbox models
// ---------------------------------------------------------------------------

/// Row struct for reading from the outbox_events table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct OutboxEventRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_code: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub ready_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub dedupe_key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insertable struct for emitting an event.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
pub(crate) struct NewOutboxEventRow<'a> {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_code: &'a str,
    pub payload: &'a serde_json::Value,
    pub status: &'a str,
    pub ready_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub dedupe_key: Option<&'a str>,
    pub metadata: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Changeset applied when an attempt resolves.
///
/// `None` fields are left untouched; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = outbox_events)]
pub(crate) struct OutboxOutcomeChangeset<'a> {
    pub status: Option<&'a str>,
    pub attempts: Option<i32>,
    pub ready_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<Option<DateTime<Utc>>>,
    pub failed_at: Option<Option<DateTime<Utc>>>,
    pub last_attempt_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<&'a str>>,
    pub claimed_by: Option<Option<&'a str>>,
    pub claimed_at: Option<Option<DateTime<Utc>>>,
}

// ---------------------------------------------------------------------------
// Webhook inbox models
// ---------------------------------------------------------------------------

/// Row struct for reading from the webhook_inbox_events table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = webhook_inbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct WebhookInboxEventRow {
    pub id: Uuid,
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Insertable struct for storing a webhook on receipt.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_inbox_events)]
pub(crate) struct NewWebhookInboxEventRow<'a> {
    pub id: Uuid,
    pub provider: &'a str,
    pub provider_event_id: &'a str,
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
    pub received_at: DateTime<Utc>,
}
