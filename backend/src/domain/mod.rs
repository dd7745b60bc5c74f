//! Domain primitives and services for reliable delivery.
//!
//! Purpose: keep booking-critical side effects exactly-once from the
//! client's point of view. Adapters live in `outbound`; this module owns the
//! types, invariants and orchestration.
//!
//! Public surface:
//! - Error (alias to `error::Error`): API error response payload.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - TenantId: tenant scope carried by every stored row.
//! - TraceId: request correlation id propagated through task locals.
//! - `idempotency`, `outbox`, `inbox` and `retention`: the four services.

pub mod error;
pub mod idempotency;
pub mod inbox;
pub mod outbox;
pub mod ports;
pub mod retention;
pub mod runtime;
pub mod tenant;
pub mod trace_id;

pub use self::error::{Error, ErrorCode, ErrorValidationError, TRACE_ID_HEADER};
pub use self::retention::RetentionSweeper;
pub use self::runtime::{BackoffJitter, RandomJitter, Sleeper, TokioSleeper};
pub use self::tenant::{TenantId, TenantIdValidationError};
pub use self::trace_id::TraceId;

/// Convenient API result alias.
///
/// # Examples
/// ```
/// use actix_web::HttpResponse;
/// use booking_relay::domain::{ApiResult, Error};
///
/// fn handler() -> ApiResult<HttpResponse> {
///     Err(Error::conflict("key in use"))
/// }
/// ```
pub type ApiResult<T> = Result<T, Error>;
