//! The relay's single error type.
//!
//! Guard rejections, store outages and webhook validation failures all
//! travel as [`Error`]: a category ([`ErrorCode`]), a client-safe message,
//! the trace id in scope when it was raised and optional JSON details. The
//! HTTP adapter owns the status mapping; the domain only picks the category
//! and, where clients need to branch, a machine-readable reason stored under
//! `details.code`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

use super::TraceId;

/// Header carrying the request trace identifier on every response.
pub const TRACE_ID_HEADER: &str = "trace-id";

const REASON_KEY: &str = "code";

/// Failure category. Each maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed input: a bad idempotency key, an oversized body, an
    /// unknown webhook provider.
    InvalidRequest,
    NotFound,
    /// The request clashes with state already held for the same key.
    Conflict,
    /// The store could not be reached; retrying later may succeed.
    ServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    /// Whether the same request may succeed unchanged on a later attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::ServiceUnavailable)
    }
}

/// Rejections from the checked constructors.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ErrorValidationError {
    #[error("error message must not be empty")]
    EmptyMessage,
    #[error("trace id must not be empty")]
    EmptyTraceId,
}

/// Domain error payload.
///
/// The message is never blank. A trace id, when present, is never blank
/// either; errors built inside a [`TraceId::scope`] pick it up on their own.
///
/// # Examples
/// ```
/// use booking_relay::domain::{Error, ErrorCode};
///
/// let err = Error::conflict("idempotency key already used")
///     .with_reason("idempotency_key_reuse");
/// assert_eq!(err.code(), ErrorCode::Conflict);
/// assert_eq!(err.reason(), Some("idempotency_key_reuse"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", try_from = "WireError", into = "WireError")]
pub struct Error {
    #[schema(example = "conflict")]
    code: ErrorCode,
    #[schema(example = "idempotency key already used with a different payload")]
    message: String,
    trace_id: Option<String>,
    details: Option<Value>,
}

impl Error {
    /// Build an error; panics on a blank message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::try_new(code, message)
            .unwrap_or_else(|err| panic!("invalid error construction: {err}"))
    }

    /// Build an error, capturing the ambient trace id.
    pub fn try_new(code: ErrorCode, message: impl Into<String>) -> Result<Self, ErrorValidationError> {
        Self::detached(code, message.into()).map(|mut error| {
            error.trace_id = TraceId::current().map(|id| id.to_string());
            error
        })
    }

    fn detached(code: ErrorCode, message: String) -> Result<Self, ErrorValidationError> {
        if message.trim().is_empty() {
            return Err(ErrorValidationError::EmptyMessage);
        }
        Ok(Self {
            code,
            message,
            trace_id: None,
            details: None,
        })
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Machine-readable reason, read from `details.code`.
    pub fn reason(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.get(REASON_KEY))
            .and_then(Value::as_str)
    }

    /// Overwrite the trace id; panics on a blank value.
    pub fn with_trace_id(self, trace_id: impl Into<String>) -> Self {
        self.try_with_trace_id(trace_id)
            .unwrap_or_else(|err| panic!("invalid error construction: {err}"))
    }

    pub fn try_with_trace_id(
        mut self,
        trace_id: impl Into<String>,
    ) -> Result<Self, ErrorValidationError> {
        let trace_id = trace_id.into();
        if trace_id.trim().is_empty() {
            return Err(ErrorValidationError::EmptyTraceId);
        }
        self.trace_id = Some(trace_id);
        Ok(self)
    }

    /// Replace the details wholesale.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Record a machine-readable reason under `details.code`, keeping any
    /// other detail fields. Non-object details are replaced.
    ///
    /// ```
    /// use booking_relay::domain::Error;
    /// use serde_json::json;
    ///
    /// let err = Error::conflict("still running")
    ///     .with_details(json!({ "retry": true }))
    ///     .with_reason("idempotency_request_in_progress");
    /// assert_eq!(
    ///     err.details(),
    ///     Some(&json!({ "retry": true, "code": "idempotency_request_in_progress" }))
    /// );
    /// ```
    pub fn with_reason(mut self, reason: &str) -> Self {
        let mut fields = match self.details.take() {
            Some(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        fields.insert(REASON_KEY.to_owned(), Value::String(reason.to_owned()));
        self.details = Some(Value::Object(fields));
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

/// JSON body shape: `{ code, message, traceId?, details? }`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    code: ErrorCode,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl From<Error> for WireError {
    fn from(error: Error) -> Self {
        let Error {
            code,
            message,
            trace_id,
            details,
        } = error;
        Self {
            code,
            message,
            trace_id,
            details,
        }
    }
}

impl TryFrom<WireError> for Error {
    type Error = ErrorValidationError;

    // A decoded body keeps the trace it was sent with, never the ambient one.
    fn try_from(wire: WireError) -> Result<Self, Self::Error> {
        let mut error = Error::detached(wire.code, wire.message)?;
        if let Some(trace_id) = wire.trace_id {
            error = error.try_with_trace_id(trace_id)?;
        }
        error.details = wire.details;
        Ok(error)
    }
}

#[cfg(test)]
mod tests;
