//! PostgreSQL-backed `IdempotencyRepository` implementation using Diesel ORM.
//!
//! The unique index on (tenant_id, key_hash, endpoint, http_method) makes
//! `claim` a single atomic insert. Takeover, completion and release are all
//! conditional updates, so a request that lost its row never overwrites a
//! newer owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::debug;

use crate::domain::TenantId;
use crate::domain::idempotency::{
    CachedResponse, ClaimOutcome, IdempotencyClaim, IdempotencyRecord, IdempotencyScope,
    IdempotencyState, KeyHash, RequestHash, StoredHeader,
};
use crate::domain::ports::{IdempotencyRepository, IdempotencyRepositoryError};

use super::error_mapping;
use super::models::{IdempotencyKeyRow, NewIdempotencyKeyRow};
use super::pool::{DbPool, PoolError};
use super::schema::idempotency_keys;

const IN_PROGRESS: &str = "in_progress";
const COMPLETED: &str = "completed";

/// Diesel-backed implementation of the `IdempotencyRepository` port.
#[derive(Clone)]
pub struct DieselIdempotencyRepository {
    pool: DbPool,
}

impl DieselIdempotencyRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> IdempotencyRepositoryError {
    error_mapping::map_pool_error(error, IdempotencyRepositoryError::connection)
}

fn map_diesel_error(
    operation: &'static str,
) -> impl FnOnce(diesel::result::Error) -> IdempotencyRepositoryError {
    move |error| {
        error_mapping::map_diesel_error(
            error,
            operation,
            IdempotencyRepositoryError::query,
            IdempotencyRepositoryError::connection,
        )
    }
}

/// Filter matching exactly one scope.
macro_rules! scope_filter {
    ($scope:expr) => {
        idempotency_keys::tenant_id
            .eq(*$scope.tenant_id.as_uuid())
            .and(idempotency_keys::key_hash.eq($scope.key_hash.as_str()))
            .and(idempotency_keys::endpoint.eq($scope.endpoint.as_str()))
            .and(idempotency_keys::http_method.eq($scope.http_method.as_str()))
    };
}

fn row_to_record(row: IdempotencyKeyRow) -> Result<IdempotencyRecord, IdempotencyRepositoryError> {
    let request_hash = RequestHash::try_from_bytes(&row.request_hash).map_err(|err| {
        IdempotencyRepositoryError::serialization(format!("corrupted request hash: {err}"))
    })?;
    let state = match row.state.as_str() {
        IN_PROGRESS => IdempotencyState::InProgress {
            // A placeholder without a lease is treated as already lapsed.
            locked_until: row.locked_until.unwrap_or(row.created_at),
        },
        COMPLETED => {
            let status = row
                .response_status
                .and_then(|status| u16::try_from(status).ok())
                .ok_or_else(|| {
                    IdempotencyRepositoryError::serialization("completed row lacks a status")
                })?;
            let headers: Vec<StoredHeader> = serde_json::from_value(row.response_headers)
                .map_err(|err| {
                    IdempotencyRepositoryError::serialization(format!(
                        "unreadable response headers: {err}"
                    ))
                })?;
            IdempotencyState::Completed(CachedResponse {
                status,
                body: row.response_body.unwrap_or_default(),
                headers,
            })
        }
        other => {
            return Err(IdempotencyRepositoryError::serialization(format!(
                "unknown idempotency state {other}"
            )));
        }
    };

    Ok(IdempotencyRecord {
        scope: IdempotencyScope {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            key_hash: KeyHash::from_stored(row.key_hash),
            endpoint: row.endpoint,
            http_method: row.http_method,
        },
        original_key: row.original_key,
        request_hash,
        state,
        expires_at: row.expires_at,
        created_at: row.created_at,
    })
}

async fn load(
    conn: &mut AsyncPgConnection,
    scope: &IdempotencyScope,
) -> Result<Option<IdempotencyRecord>, IdempotencyRepositoryError> {
    idempotency_keys::table
        .filter(scope_filter!(scope))
        .select(IdempotencyKeyRow::as_select())
        .first(conn)
        .await
        .optional()
        .map_err(map_diesel_error("load idempotency key"))?
        .map(row_to_record)
        .transpose()
}

#[async_trait]
impl IdempotencyRepository for DieselIdempotencyRepository {
    async fn claim(
        &self,
        claim: &IdempotencyClaim,
    ) -> Result<ClaimOutcome, IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let scope = &claim.scope;
        let row = NewIdempotencyKeyRow {
            tenant_id: *scope.tenant_id.as_uuid(),
            key_hash: scope.key_hash.as_str(),
            original_key: &claim.original_key,
            endpoint: &scope.endpoint,
            http_method: &scope.http_method,
            request_hash: claim.request_hash.as_bytes().as_slice(),
            state: IN_PROGRESS,
            locked_until: Some(claim.locked_until),
            expires_at: claim.expires_at,
            created_at: claim.claimed_at,
            updated_at: claim.claimed_at,
        };

        // The holder may release its row between our insert and read; one
        // retry covers that window.
        for _ in 0..2 {
            let inserted = diesel::insert_into(idempotency_keys::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .await
                .map_err(map_diesel_error("claim idempotency key"))?;
            if inserted == 1 {
                return Ok(ClaimOutcome::Claimed);
            }
            if let Some(existing) = load(&mut conn, scope).await? {
                return Ok(ClaimOutcome::Existing(existing));
            }
            debug!("idempotency row vanished during claim; retrying insert");
        }
        Err(IdempotencyRepositoryError::query(
            "claim idempotency key: row changed concurrently",
        ))
    }

    async fn take_over(
        &self,
        claim: &IdempotencyClaim,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let lapsed = idempotency_keys::expires_at.le(now).or(idempotency_keys::state
            .eq(IN_PROGRESS)
            .and(idempotency_keys::locked_until.le(now)));

        let updated = diesel::update(
            idempotency_keys::table
                .filter(scope_filter!(claim.scope))
                .filter(lapsed),
        )
        .set((
            idempotency_keys::original_key.eq(&claim.original_key),
            idempotency_keys::request_hash.eq(claim.request_hash.as_bytes().as_slice()),
            idempotency_keys::state.eq(IN_PROGRESS),
            idempotency_keys::response_status.eq(None::<i32>),
            idempotency_keys::response_body.eq(None::<Vec<u8>>),
            idempotency_keys::response_headers.eq(serde_json::Value::Array(Vec::new())),
            idempotency_keys::locked_until.eq(Some(claim.locked_until)),
            idempotency_keys::expires_at.eq(claim.expires_at),
            idempotency_keys::created_at.eq(claim.claimed_at),
            idempotency_keys::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("take over idempotency key"))?;
        Ok(updated == 1)
    }

    async fn complete(
        &self,
        scope: &IdempotencyScope,
        response: &CachedResponse,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyRepositoryError> {
        let headers = serde_json::to_value(&response.headers).map_err(|err| {
            IdempotencyRepositoryError::serialization(format!("encode response headers: {err}"))
        })?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            idempotency_keys::table
                .filter(scope_filter!(scope))
                .filter(idempotency_keys::state.eq(IN_PROGRESS)),
        )
        .set((
            idempotency_keys::state.eq(COMPLETED),
            idempotency_keys::response_status.eq(Some(i32::from(response.status))),
            idempotency_keys::response_body.eq(Some(response.body.as_slice())),
            idempotency_keys::response_headers.eq(headers),
            idempotency_keys::locked_until.eq(None::<DateTime<Utc>>),
            idempotency_keys::expires_at.eq(expires_at),
            idempotency_keys::updated_at.eq(now),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("complete idempotency key"))?;

        if updated == 0 {
            return Err(IdempotencyRepositoryError::query(
                "complete idempotency key: claim no longer held",
            ));
        }
        Ok(())
    }

    async fn release(&self, scope: &IdempotencyScope) -> Result<(), IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::delete(
            idempotency_keys::table
                .filter(scope_filter!(scope))
                .filter(idempotency_keys::state.eq(IN_PROGRESS)),
        )
        .execute(&mut conn)
        .await
        .map(|_| ())
        .map_err(map_diesel_error("release idempotency key"))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(idempotency_keys::table)
            .filter(idempotency_keys::expires_at.lt(now))
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("sweep idempotency keys"))?;
        debug!(deleted, cutoff = %now, "deleted expired idempotency keys");
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}
