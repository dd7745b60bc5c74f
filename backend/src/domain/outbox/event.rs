//! Outbox event model and delivery state machine values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::TenantId;

/// Closed set of event families, each served by one injected handler.
///
/// # Example
///
/// ```
/// # use booking_relay::domain::outbox::{EventCategory, EventCode};
/// let code = EventCode::new("NOTIFY_BOOKING_CONFIRMED").expect("valid code");
/// assert_eq!(code.category(), Some(EventCategory::Notification));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// `NOTIFY_*`: customer and staff notifications.
    Notification,
    /// `WEBHOOK_*`: calls to tenant-configured webhooks.
    Webhook,
    /// `ANALYTICS_*`: analytics writes.
    Analytics,
}

impl EventCategory {
    /// All categories.
    pub const ALL: [EventCategory; 3] = [
        EventCategory::Notification,
        EventCategory::Webhook,
        EventCategory::Analytics,
    ];

    /// Event code prefix owned by the category.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Notification => "NOTIFY_",
            Self::Webhook => "WEBHOOK_",
            Self::Analytics => "ANALYTICS_",
        }
    }

    /// Stable lower-case name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Webhook => "webhook",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation errors for [`EventCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCodeValidationError {
    /// The code was empty.
    Empty,
    /// The code exceeded [`EventCode::MAX_LENGTH`] characters.
    TooLong,
    /// The code contained characters outside `[A-Z0-9_]`.
    InvalidCharacters,
}

impl fmt::Display for EventCodeValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "event code must not be empty"),
            Self::TooLong => write!(
                f,
                "event code must be at most {} characters",
                EventCode::MAX_LENGTH
            ),
            Self::InvalidCharacters => {
                write!(f, "event code must contain only A-Z, 0-9 and '_'")
            }
        }
    }
}

impl std::error::Error for EventCodeValidationError {}

/// Namespaced event code such as `NOTIFY_BOOKING_CONFIRMED`.
///
/// Codes outside the known prefixes are valid to store; the publisher
/// dead-letters them instead of delivering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventCode(String);

impl EventCode {
    /// Longest accepted code.
    pub const MAX_LENGTH: usize = 100;

    /// Validate and construct an event code.
    pub fn new(code: impl Into<String>) -> Result<Self, EventCodeValidationError> {
        let code = code.into();
        if code.is_empty() {
            return Err(EventCodeValidationError::Empty);
        }
        if code.len() > Self::MAX_LENGTH {
            return Err(EventCodeValidationError::TooLong);
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(EventCodeValidationError::InvalidCharacters);
        }
        Ok(Self(code))
    }

    /// Access the raw code.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Category selected by the code prefix, if any.
    pub fn category(&self) -> Option<EventCategory> {
        EventCategory::ALL
            .into_iter()
            .find(|category| self.0.starts_with(category.prefix()))
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxStatus {
    /// Waiting for (re)delivery at or after `ready_at`.
    Ready,
    /// Handler succeeded. Terminal.
    Delivered,
    /// Retry budget exhausted. Terminal until replayed.
    Failed,
    /// No handler can serve the event code. Terminal until replayed.
    DeadLettered,
}

impl OutboxStatus {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Whether an operator may replay an event in this status.
    pub fn is_replayable(&self) -> bool {
        matches!(self, Self::Failed | Self::DeadLettered)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outbox status: {0}")]
pub struct ParseOutboxStatusError(String);

impl FromStr for OutboxStatus {
    type Err = ParseOutboxStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(ParseOutboxStatusError(other.to_owned())),
        }
    }
}

/// Stored outbox event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    /// Row identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Namespaced code.
    pub event_code: EventCode,
    /// Opaque payload passed to the handler.
    pub payload: Value,
    /// Delivery status.
    pub status: OutboxStatus,
    /// Earliest time the event may be attempted.
    pub ready_at: DateTime<Utc>,
    /// Set once delivered.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set once failed or dead-lettered.
    pub failed_at: Option<DateTime<Utc>>,
    /// Handler invocations so far.
    pub attempts: u32,
    /// Retry budget.
    pub max_attempts: u32,
    /// Time of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub error_message: Option<String>,
    /// Caller-supplied deduplication key.
    pub dedupe_key: Option<String>,
    /// Free-form metadata.
    pub metadata: Value,
    /// When the event was emitted.
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Whether the publisher may attempt the event at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Ready
            && self.attempts < self.max_attempts
            && self.ready_at <= now
    }

    /// Key sent downstream so receivers can drop duplicate deliveries.
    pub fn delivery_key(&self) -> String {
        self.dedupe_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Event a caller wants emitted.
///
/// # Example
///
/// ```
/// # use booking_relay::domain::TenantId;
/// # use booking_relay::domain::outbox::{EventCode, NewOutboxEvent};
/// # use serde_json::json;
/// let event = NewOutboxEvent::new(
///     TenantId::random(),
///     EventCode::new("ANALYTICS_BOOKING_CREATED").expect("valid code"),
///     json!({"booking_id": "b-1"}),
/// )
/// .with_max_attempts(5)
/// .with_dedupe_key("booking-b-1-created");
/// assert_eq!(event.max_attempts, 5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEvent {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Namespaced code.
    pub event_code: EventCode,
    /// Opaque payload.
    pub payload: Value,
    /// Earliest delivery time; defaults to the emit time.
    pub ready_at: Option<DateTime<Utc>>,
    /// Retry budget, at least 1.
    pub max_attempts: u32,
    /// Optional per-tenant deduplication key.
    pub dedupe_key: Option<String>,
    /// Free-form metadata.
    pub metadata: Value,
}

impl NewOutboxEvent {
    /// Default retry budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Build an event due immediately with the default retry budget.
    pub fn new(tenant_id: TenantId, event_code: EventCode, payload: Value) -> Self {
        Self {
            tenant_id,
            event_code,
            payload,
            ready_at: None,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            dedupe_key: None,
            metadata: Value::Object(serde_json::Map::new()),
        }
    }

    /// Delay the first attempt.
    #[must_use]
    pub fn with_ready_at(mut self, ready_at: DateTime<Utc>) -> Self {
        self.ready_at = Some(ready_at);
        self
    }

    /// Override the retry budget; values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attach a deduplication key.
    #[must_use]
    pub fn with_dedupe_key(mut self, dedupe_key: impl Into<String>) -> Self {
        self.dedupe_key = Some(dedupe_key.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of emitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// A new row was written.
    Enqueued(Uuid),
    /// A row with the same tenant and dedupe key already existed.
    Deduplicated(Uuid),
}

impl EmitOutcome {
    /// Identifier of the stored event.
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::Enqueued(id) | Self::Deduplicated(id) => *id,
        }
    }
}

/// How one delivery attempt ended; applied to the row by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResolution {
    /// Handler succeeded.
    Delivered {
        /// Attempt count including this one.
        attempts: u32,
        /// Completion time.
        at: DateTime<Utc>,
    },
    /// Handler failed with budget left; re-armed for later.
    Retry {
        /// Attempt count including this one.
        attempts: u32,
        /// Attempt time.
        at: DateTime<Utc>,
        /// Next eligible time, strictly after `at`.
        ready_at: DateTime<Utc>,
        /// Failure description.
        error: String,
    },
    /// Handler failed and the budget is spent.
    Failed {
        /// Attempt count including this one.
        attempts: u32,
        /// Attempt time.
        at: DateTime<Utc>,
        /// Failure description.
        error: String,
    },
    /// No handler can serve the event.
    DeadLettered {
        /// Resolution time.
        at: DateTime<Utc>,
        /// Why the event cannot be delivered.
        reason: String,
    },
}

impl AttemptResolution {
    /// Status the row ends up in.
    pub fn status(&self) -> OutboxStatus {
        match self {
            Self::Delivered { .. } => OutboxStatus::Delivered,
            Self::Retry { .. } => OutboxStatus::Ready,
            Self::Failed { .. } => OutboxStatus::Failed,
            Self::DeadLettered { .. } => OutboxStatus::DeadLettered,
        }
    }
}
