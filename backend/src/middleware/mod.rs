//! Request middleware.
//!
//! Purpose: request lifecycle concerns shared by every route: trace-id
//! propagation and the idempotency guard for critical writes.

pub mod idempotency;
pub mod trace;

pub use idempotency::IdempotencyGuardMiddleware;
pub use trace::Trace;
