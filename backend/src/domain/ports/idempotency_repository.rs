//! Port abstraction for idempotency key persistence.
//!
//! The unique constraint on (tenant, key hash, endpoint, method) is the
//! concurrency primitive: [`IdempotencyRepository::claim`] must be a single
//! atomic insert so that exactly one concurrent request wins a fresh key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::idempotency::{
    CachedResponse, ClaimOutcome, IdempotencyClaim, IdempotencyScope,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency repository adapters.
    pub enum IdempotencyRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String }
            => "idempotency store unavailable: {message}" => ServiceUnavailable,
        /// Query or mutation failed during execution. The guard fails
        /// closed, so this also surfaces as unavailable.
        Query { message: String }
            => "idempotency store error: {message}" => ServiceUnavailable,
        /// Stored response could not be encoded or decoded.
        Serialization { message: String }
            => "stored idempotent response is unreadable: {message}" => InternalError,
    }
}

/// Port for idempotency record storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Insert an in-progress placeholder, or return the row that already holds
    /// the scope.
    async fn claim(
        &self,
        claim: &IdempotencyClaim,
    ) -> Result<ClaimOutcome, IdempotencyRepositoryError>;

    /// Replace an expired row or a lapsed in-progress placeholder with a fresh
    /// claim.
    ///
    /// Returns `false` when the row changed underneath the caller (another
    /// request took it over or completed it first).
    async fn take_over(
        &self,
        claim: &IdempotencyClaim,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyRepositoryError>;

    /// Store the final response on an in-progress row.
    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response: &CachedResponse,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyRepositoryError>;

    /// Delete an in-progress placeholder so the key may be retried.
    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyRepositoryError>;

    /// Delete every row whose `expires_at` is before `now`.
    ///
    /// Returns the number of rows deleted.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError>;
}
