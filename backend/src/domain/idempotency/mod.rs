//! Idempotency primitives and the guard for critical write endpoints.
//!
//! - [`IdempotencyKey`]: validated client token sent in `Idempotency-Key`.
//!   Only its SHA-256 ([`KeyHash`]) identifies stored rows.
//! - [`RequestHash`]: SHA-256 of the canonicalised request body, used to
//!   reject reuse of a key with a different payload.
//! - [`CriticalEndpoint`]: the closed set of guarded routes.
//! - [`IdempotencyRecord`]: stored row, either in progress or completed with
//!   a [`CachedResponse`].
//! - [`IdempotencyGuard`]: claim, replay, wait or reject.
//!
//! # Payload Canonicalisation
//!
//! JSON bodies have their object keys sorted recursively and are serialised
//! compactly before hashing. Non-JSON bodies are hashed byte for byte.

mod config;
mod endpoint;
mod guard;
mod key;
mod payload;
mod record;

pub use config::{
    IDEMPOTENCY_LEASE_SECS_ENV, IDEMPOTENCY_MAX_WAIT_MS_ENV, IDEMPOTENCY_TTL_HOURS_ENV,
    IdempotencyConfig,
};
pub use endpoint::CriticalEndpoint;
pub use guard::{
    GuardDecision, GuardRequest, GuardTicket, IN_PROGRESS_CODE, IdempotencyGuard, KEY_REUSE_CODE,
};
pub use key::{IdempotencyKey, IdempotencyKeyValidationError, KeyHash};
pub use payload::{RequestHash, RequestHashError, canonicalize_and_hash, hash_request_body};
pub use record::{
    CachedResponse, ClaimOutcome, IdempotencyClaim, IdempotencyRecord, IdempotencyScope,
    IdempotencyState, StoredHeader,
};
