//! In-memory idempotency repository honouring the unique-scope claim.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::lock;
use crate::domain::idempotency::{
    CachedResponse, ClaimOutcome, IdempotencyClaim, IdempotencyRecord, IdempotencyScope,
    IdempotencyState,
};
use crate::domain::ports::{IdempotencyRepository, IdempotencyRepositoryError};

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    rows: Mutex<HashMap<IdempotencyScope, IdempotencyRecord>>,
    fail_claims: AtomicBool,
    fail_completes: AtomicBool,
    completes: AtomicUsize,
}

impl InMemoryIdempotencyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every claim fail with a connection error.
    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    /// Make every completion fail with a query error.
    pub fn fail_completes(&self, fail: bool) {
        self.fail_completes.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, record: IdempotencyRecord) {
        lock(&self.rows).insert(record.scope.clone(), record);
    }

    pub fn get(&self, scope: &IdempotencyScope) -> Option<IdempotencyRecord> {
        lock(&self.rows).get(scope).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn completed_count(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }
}

fn placeholder(claim: &IdempotencyClaim) -> IdempotencyRecord {
    IdempotencyRecord {
        scope: claim.scope.clone(),
        original_key: claim.original_key.clone(),
        request_hash: claim.request_hash.clone(),
        state: IdempotencyState::InProgress {
            locked_until: claim.locked_until,
        },
        expires_at: claim.expires_at,
        created_at: claim.claimed_at,
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn claim(
        &self,
        claim: &IdempotencyClaim,
    ) -> Result<ClaimOutcome, IdempotencyRepositoryError> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(IdempotencyRepositoryError::connection("store offline"));
        }
        let mut rows = lock(&self.rows);
        if let Some(existing) = rows.get(&claim.scope) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        rows.insert(claim.scope.clone(), placeholder(claim));
        Ok(ClaimOutcome::Claimed)
    }

    async fn take_over(
        &self,
        claim: &IdempotencyClaim,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyRepositoryError> {
        let mut rows = lock(&self.rows);
        let replaceable = match rows.get(&claim.scope) {
            None => true,
            Some(row) => row.is_expired(now) || row.is_stale_claim(now),
        };
        if replaceable {
            rows.insert(claim.scope.clone(), placeholder(claim));
        }
        Ok(replaceable)
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response: &CachedResponse,
        expires_at: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<(), IdempotencyRepositoryError> {
        if self.fail_completes.load(Ordering::SeqCst) {
            return Err(IdempotencyRepositoryError::query("write rejected"));
        }
        let mut rows = lock(&self.rows);
        let Some(row) = rows.get_mut(scope) else {
            return Err(IdempotencyRepositoryError::query("claim vanished"));
        };
        row.state = IdempotencyState::Completed(response.clone());
        row.expires_at = expires_at;
        self.completes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyRepositoryError> {
        let mut rows = lock(&self.rows);
        if matches!(
            rows.get(scope).map(|row| &row.state),
            Some(IdempotencyState::InProgress { .. })
        ) {
            rows.remove(scope);
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|_, row| row.expires_at >= now);
        Ok(u64::try_from(before - rows.len()).unwrap_or(u64::MAX))
    }
}
