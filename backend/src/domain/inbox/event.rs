//! Webhook inbox records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Validation errors for [`ProviderName`] and provider event ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxValidationError {
    /// Provider name was empty.
    EmptyProvider,
    /// Provider name contained characters outside `[a-z0-9_-]` or was too long.
    InvalidProvider,
    /// Provider event id was empty or blank.
    EmptyEventId,
    /// Provider event id exceeded 255 characters.
    EventIdTooLong,
}

impl fmt::Display for InboxValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyProvider => write!(f, "provider must not be empty"),
            Self::InvalidProvider => write!(
                f,
                "provider must be at most 64 characters of a-z, 0-9, '_' or '-'"
            ),
            Self::EmptyEventId => write!(f, "provider event id must not be empty"),
            Self::EventIdTooLong => write!(f, "provider event id must be at most 255 characters"),
        }
    }
}

impl std::error::Error for InboxValidationError {}

/// Third-party provider slug such as `stripe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderName(String);

impl ProviderName {
    const MAX_LENGTH: usize = 64;

    /// Validate and construct a provider name.
    pub fn new(name: impl Into<String>) -> Result<Self, InboxValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InboxValidationError::EmptyProvider);
        }
        let valid = name.len() <= Self::MAX_LENGTH
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return Err(InboxValidationError::InvalidProvider);
        }
        Ok(Self(name))
    }

    /// Access the slug.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a provider-assigned event id.
pub fn validate_provider_event_id(event_id: &str) -> Result<(), InboxValidationError> {
    if event_id.trim().is_empty() {
        return Err(InboxValidationError::EmptyEventId);
    }
    if event_id.chars().count() > 255 {
        return Err(InboxValidationError::EventIdTooLong);
    }
    Ok(())
}

/// Declared event type: payload `type`, then `event_type`, else `unknown`.
///
/// # Example
///
/// ```
/// # use booking_relay::domain::inbox::event_type_of;
/// # use serde_json::json;
/// assert_eq!(event_type_of(&json!({"type": "payment_intent.succeeded"})), "payment_intent.succeeded");
/// assert_eq!(event_type_of(&json!({"event_type": "sms.delivered"})), "sms.delivered");
/// assert_eq!(event_type_of(&json!({"id": "evt_1"})), "unknown");
/// ```
pub fn event_type_of(payload: &Value) -> String {
    ["type", "event_type"]
        .into_iter()
        .find_map(|field| payload.get(field).and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_owned()
}

/// Stored inbound webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookInboxEvent {
    /// Row identifier.
    pub id: Uuid,
    /// Sending provider.
    pub provider: ProviderName,
    /// Provider-assigned event id.
    pub provider_event_id: String,
    /// Declared event type.
    pub event_type: String,
    /// Raw payload.
    pub payload: Value,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
    /// Set once the domain effect has been applied.
    pub processed_at: Option<DateTime<Utc>>,
    /// A consumer holds the row until this instant.
    pub claimed_until: Option<DateTime<Utc>>,
    /// Failed processing attempts.
    pub attempts: u32,
    /// Most recent failure.
    pub last_error: Option<String>,
}

impl WebhookInboxEvent {
    /// Whether the domain effect has been applied.
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Webhook about to be stored on receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookInboxEvent {
    /// Sending provider.
    pub provider: ProviderName,
    /// Provider-assigned event id.
    pub provider_event_id: String,
    /// Declared event type.
    pub event_type: String,
    /// Raw payload.
    pub payload: Value,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

impl NewWebhookInboxEvent {
    /// Build a record, deriving the event type from the payload.
    pub fn from_payload(
        provider: ProviderName,
        provider_event_id: impl Into<String>,
        payload: Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, InboxValidationError> {
        let provider_event_id = provider_event_id.into();
        validate_provider_event_id(&provider_event_id)?;
        Ok(Self {
            event_type: event_type_of(&payload),
            provider,
            provider_event_id,
            payload,
            received_at,
        })
    }
}

/// Result of storing a webhook on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// First delivery; a row was written.
    Received,
    /// Provider redelivery of a stored event.
    Duplicate,
}

impl ReceiveOutcome {
    /// Wire name used in receiver responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Result of processing a stored webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The handler ran and the row is now processed.
    Processed,
    /// The row was already processed; nothing ran.
    AlreadyProcessed,
}

/// Counts from one pending sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingReport {
    /// Rows processed in this sweep.
    pub processed: usize,
    /// Rows found already processed or held by another consumer.
    pub skipped: usize,
    /// Rows whose handler failed.
    pub failed: usize,
}
