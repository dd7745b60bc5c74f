//! Outcome counting for the idempotency guard.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    pub enum IdempotencyMetricsError {
        Export { message: String } => "idempotency metrics exporter failed: {message}",
    }
}

/// Why the guard turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Same key, different body.
    KeyReuse,
    /// Same key still being handled after the wait budget ran out.
    InFlight,
}

/// What the guard decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardOutcome {
    /// First use of the key; the handler runs.
    Miss,
    /// Stored response replayed.
    Hit,
    /// A lapsed or abandoned key was reclaimed and the handler runs again.
    TakeOver,
    Conflict(ConflictKind),
}

impl GuardOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Miss => "miss",
            Self::Hit => "hit",
            Self::TakeOver => "takeover",
            Self::Conflict(_) => "conflict",
        }
    }

    pub fn conflict_reason(self) -> Option<&'static str> {
        match self {
            Self::Conflict(ConflictKind::KeyReuse) => Some("key_reuse"),
            Self::Conflict(ConflictKind::InFlight) => Some("in_flight"),
            _ => None,
        }
    }
}

/// Dimensions attached to each recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyMetricLabels {
    /// First 8 hex chars of SHA-256 over the tenant id; never the id itself.
    pub tenant_scope: String,
    /// Guarded endpoint, e.g. `create_booking`.
    pub endpoint: String,
    /// Age of the stored key (`0-1m`, `1-5m`, ...); `None` when no key existed.
    pub age_bucket: Option<String>,
}

/// Sink for guard outcomes. Failures are swallowed by the guard; a broken
/// exporter must never change how a booking request is answered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyMetrics: Send + Sync {
    async fn record(
        &self,
        outcome: GuardOutcome,
        labels: &IdempotencyMetricLabels,
    ) -> Result<(), IdempotencyMetricsError>;
}

/// Discards every outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpIdempotencyMetrics;

#[async_trait]
impl IdempotencyMetrics for NoOpIdempotencyMetrics {
    async fn record(
        &self,
        _outcome: GuardOutcome,
        _labels: &IdempotencyMetricLabels,
    ) -> Result<(), IdempotencyMetricsError> {
        Ok(())
    }
}
