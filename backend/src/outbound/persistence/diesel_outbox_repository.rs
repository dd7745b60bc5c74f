//! PostgreSQL-backed `OutboxRepository` implementation using Diesel ORM.
//!
//! Publishers claim rows with `FOR UPDATE SKIP LOCKED` and stamp
//! `claimed_by`/`claimed_at` in the same transaction, so concurrent workers
//! never deliver the same row at once. Outcomes are written only while the
//! worker still holds the stamp.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use crate::domain::TenantId;
use crate::domain::outbox::{
    AttemptResolution, EmitOutcome, EventCode, NewOutboxEvent, OutboxEvent, OutboxStatus,
};
use crate::domain::ports::{OutboxRepository, OutboxRepositoryError};

use super::error_mapping::{self, count_from_db, count_to_db};
use super::models::{NewOutboxEventRow, OutboxEventRow, OutboxOutcomeChangeset};
use super::pool::{DbPool, PoolError};
use super::schema::outbox_events;

/// Diesel-backed implementation of the `OutboxRepository` port.
#[derive(Clone)]
pub struct DieselOutboxRepository {
    pool: DbPool,
}

impl DieselOutboxRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> OutboxRepositoryError {
    error_mapping::map_pool_error(error, OutboxRepositoryError::connection)
}

fn map_diesel_error(
    operation: &'static str,
) -> impl FnOnce(diesel::result::Error) -> OutboxRepositoryError {
    move |error| {
        error_mapping::map_diesel_error(
            error,
            operation,
            OutboxRepositoryError::query,
            OutboxRepositoryError::connection,
        )
    }
}

/// Insert an outbox row on a caller-supplied connection.
///
/// Call this inside the transaction that writes the domain change so the
/// event commits or rolls back with it. A repeated `(tenant, dedupe_key)`
/// returns the existing row's id instead of inserting.
///
/// # Example
///
/// ```ignore
/// conn.transaction(|conn| {
///     async move {
///         insert_booking(conn, &booking).await?;
///         emit_event_in(conn, &event, now).await?;
///         Ok(())
///     }
///     .scope_boxed()
/// })
/// .await?;
/// ```
pub async fn emit_event_in(
    conn: &mut AsyncPgConnection,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<EmitOutcome, OutboxRepositoryError> {
    let row = NewOutboxEventRow {
        id: Uuid::new_v4(),
        tenant_id: *event.tenant_id.as_uuid(),
        event_code: event.event_code.as_str(),
        payload: &event.payload,
        status: OutboxStatus::Ready.as_str(),
        ready_at: event.ready_at.unwrap_or(now),
        attempts: 0,
        max_attempts: count_to_db(event.max_attempts),
        dedupe_key: event.dedupe_key.as_deref(),
        metadata: &event.metadata,
        created_at: now,
        updated_at: now,
    };

    let inserted: Option<Uuid> = diesel::insert_into(outbox_events::table)
        .values(&row)
        .on_conflict_do_nothing()
        .returning(outbox_events::id)
        .get_result(conn)
        .await
        .optional()
        .map_err(map_diesel_error("emit outbox event"))?;
    if let Some(id) = inserted {
        return Ok(EmitOutcome::Enqueued(id));
    }

    let Some(dedupe_key) = event.dedupe_key.as_deref() else {
        return Err(OutboxRepositoryError::query(
            "emit outbox event: insert conflicted without a dedupe key",
        ));
    };
    let existing: Uuid = outbox_events::table
        .filter(outbox_events::tenant_id.eq(*event.tenant_id.as_uuid()))
        .filter(outbox_events::dedupe_key.eq(dedupe_key))
        .select(outbox_events::id)
        .first(conn)
        .await
        .map_err(map_diesel_error("load deduplicated outbox event"))?;
    Ok(EmitOutcome::Deduplicated(existing))
}

fn row_to_event(row: OutboxEventRow) -> Result<OutboxEvent, OutboxRepositoryError> {
    let event_code = EventCode::new(row.event_code).map_err(|err| {
        OutboxRepositoryError::query(format!("outbox event {} has a corrupt code: {err}", row.id))
    })?;
    let status: OutboxStatus = row.status.parse().map_err(|err| {
        OutboxRepositoryError::query(format!("outbox event {} has a corrupt status: {err}", row.id))
    })?;
    Ok(OutboxEvent {
        id: row.id,
        tenant_id: TenantId::from_uuid(row.tenant_id),
        event_code,
        payload: row.payload,
        status,
        ready_at: row.ready_at,
        delivered_at: row.delivered_at,
        failed_at: row.failed_at,
        attempts: count_from_db(row.attempts),
        max_attempts: count_from_db(row.max_attempts),
        last_attempt_at: row.last_attempt_at,
        error_message: row.error_message,
        dedupe_key: row.dedupe_key,
        metadata: row.metadata,
        created_at: row.created_at,
    })
}

/// Column updates for one resolved attempt. The claim is always dropped.
fn outcome_changeset(resolution: &AttemptResolution) -> OutboxOutcomeChangeset<'_> {
    let base = OutboxOutcomeChangeset {
        status: Some(resolution.status().as_str()),
        claimed_by: Some(None),
        claimed_at: Some(None),
        ..OutboxOutcomeChangeset::default()
    };
    match resolution {
        AttemptResolution::Delivered { attempts, at } => OutboxOutcomeChangeset {
            attempts: Some(count_to_db(*attempts)),
            last_attempt_at: Some(Some(*at)),
            delivered_at: Some(Some(*at)),
            error_message: Some(None),
            ..base
        },
        AttemptResolution::Retry {
            attempts,
            at,
            ready_at,
            error,
        } => OutboxOutcomeChangeset {
            attempts: Some(count_to_db(*attempts)),
            last_attempt_at: Some(Some(*at)),
            ready_at: Some(*ready_at),
            error_message: Some(Some(error.as_str())),
            ..base
        },
        AttemptResolution::Failed {
            attempts,
            at,
            error,
        } => OutboxOutcomeChangeset {
            attempts: Some(count_to_db(*attempts)),
            last_attempt_at: Some(Some(*at)),
            failed_at: Some(Some(*at)),
            error_message: Some(Some(error.as_str())),
            ..base
        },
        AttemptResolution::DeadLettered { at, reason } => OutboxOutcomeChangeset {
            failed_at: Some(Some(*at)),
            error_message: Some(Some(reason.as_str())),
            ..base
        },
    }
}

/// Claims stamped before this instant are treated as abandoned.
fn stale_claim_cutoff(now: DateTime<Utc>, claim_timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(claim_timeout)
        .ok()
        .and_then(|timeout| now.checked_sub_signed(timeout))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl OutboxRepository for DieselOutboxRepository {
    async fn enqueue(
        &self,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> Result<EmitOutcome, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        emit_event_in(&mut conn, event, now).await
    }

    async fn claim_ready(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: u32,
        claim_timeout: Duration,
    ) -> Result<Vec<OutboxEvent>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let cutoff = stale_claim_cutoff(now, claim_timeout);
        let limit = i64::from(limit);
        let worker_id = worker_id.to_owned();

        let mut rows: Vec<OutboxEventRow> = conn
            .transaction(|conn| {
                async move {
                    let ids: Vec<Uuid> = outbox_events::table
                        .filter(outbox_events::status.eq(OutboxStatus::Ready.as_str()))
                        .filter(outbox_events::ready_at.le(now))
                        .filter(outbox_events::attempts.lt(outbox_events::max_attempts))
                        .filter(
                            outbox_events::claimed_at
                                .is_null()
                                .or(outbox_events::claimed_at.le(cutoff)),
                        )
                        .order(outbox_events::ready_at.asc())
                        .limit(limit)
                        .select(outbox_events::id)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                        .await?;
                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }

                    diesel::update(outbox_events::table.filter(outbox_events::id.eq_any(&ids)))
                        .set((
                            outbox_events::claimed_by.eq(Some(worker_id.as_str())),
                            outbox_events::claimed_at.eq(Some(now)),
                        ))
                        .returning(OutboxEventRow::as_returning())
                        .get_results(conn)
                        .await
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error("claim outbox events"))?;

        // UPDATE ... RETURNING does not preserve the SELECT order.
        rows.sort_by_key(|row| (row.ready_at, row.created_at));
        debug!(claimed = rows.len(), "claimed outbox events");
        rows.into_iter().map(row_to_event).collect()
    }

    async fn renew_claim(
        &self,
        event_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            outbox_events::table
                .filter(outbox_events::id.eq(event_id))
                .filter(outbox_events::status.eq(OutboxStatus::Ready.as_str()))
                .filter(outbox_events::claimed_by.eq(worker_id)),
        )
        .set(outbox_events::claimed_at.eq(Some(now)))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("renew outbox claim"))?;
        Ok(updated == 1)
    }

    async fn record_outcome(
        &self,
        event_id: Uuid,
        worker_id: &str,
        resolution: &AttemptResolution,
    ) -> Result<(), OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            outbox_events::table
                .filter(outbox_events::id.eq(event_id))
                .filter(outbox_events::claimed_by.eq(worker_id)),
        )
        .set(&outcome_changeset(resolution))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("record outbox outcome"))?;

        if updated == 0 {
            return Err(OutboxRepositoryError::claim_lost(event_id));
        }
        Ok(())
    }

    async fn find(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        outbox_events::table
            .find(event_id)
            .select(OutboxEventRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error("load outbox event"))?
            .map(row_to_event)
            .transpose()
    }

    async fn replay(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, OutboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let replayable = [
            OutboxStatus::Failed.as_str(),
            OutboxStatus::DeadLettered.as_str(),
        ];
        let updated = diesel::update(
            outbox_events::table
                .filter(outbox_events::id.eq(event_id))
                .filter(outbox_events::status.eq_any(replayable)),
        )
        .set((
            outbox_events::status.eq(OutboxStatus::Ready.as_str()),
            outbox_events::attempts.eq(0),
            outbox_events::ready_at.eq(now),
            outbox_events::failed_at.eq(None::<DateTime<Utc>>),
            outbox_events::error_message.eq(None::<String>),
            outbox_events::claimed_by.eq(None::<String>),
            outbox_events::claimed_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("replay outbox event"))?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[fixture]
    fn row() -> OutboxEventRow {
        OutboxEventRow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_code: "NOTIFY_BOOKING_CONFIRMED".to_owned(),
            payload: json!({"booking_id": 42}),
            status: "ready".to_owned(),
            ready_at: at(0),
            delivered_at: None,
            failed_at: None,
            attempts: 1,
            max_attempts: 3,
            last_attempt_at: Some(at(0)),
            error_message: Some("timeout".to_owned()),
            dedupe_key: Some("booking-42".to_owned()),
            metadata: json!({}),
            created_at: at(0),
        }
    }

    #[rstest]
    fn rows_map_to_domain_events(row: OutboxEventRow) {
        let event = row_to_event(row).expect("valid row");
        assert_eq!(event.status, OutboxStatus::Ready);
        assert_eq!(event.event_code.as_str(), "NOTIFY_BOOKING_CONFIRMED");
        assert_eq!((event.attempts, event.max_attempts), (1, 3));
    }

    #[rstest]
    fn negative_counts_floor_at_zero(mut row: OutboxEventRow) {
        row.attempts = -4;
        assert_eq!(row_to_event(row).expect("valid row").attempts, 0);
    }

    #[rstest]
    #[case::status("status")]
    #[case::code("code")]
    fn corrupt_columns_are_query_errors(mut row: OutboxEventRow, #[case] column: &str) {
        match column {
            "status" => row.status = "archived".to_owned(),
            _ => row.event_code = "Bad Code".to_owned(),
        }
        let err = row_to_event(row).expect_err("corrupt row");
        assert!(matches!(err, OutboxRepositoryError::Query { .. }));
        assert!(err.to_string().contains(column));
    }

    #[rstest]
    fn delivered_clears_error_and_claim() {
        let resolution = AttemptResolution::Delivered {
            attempts: 2,
            at: at(5),
        };
        let changes = outcome_changeset(&resolution);
        assert_eq!(changes.status, Some("delivered"));
        assert_eq!(changes.attempts, Some(2));
        assert_eq!(changes.delivered_at, Some(Some(at(5))));
        assert_eq!(changes.error_message, Some(None));
        assert_eq!(changes.claimed_by, Some(None));
        assert_eq!(changes.failed_at, None);
    }

    #[rstest]
    fn retry_moves_ready_at_and_keeps_status_ready() {
        let resolution = AttemptResolution::Retry {
            attempts: 1,
            at: at(0),
            ready_at: at(1),
            error: "503".to_owned(),
        };
        let changes = outcome_changeset(&resolution);
        assert_eq!(changes.status, Some("ready"));
        assert_eq!(changes.ready_at, Some(at(1)));
        assert_eq!(changes.error_message, Some(Some("503")));
        assert_eq!(changes.delivered_at, None);
    }

    #[rstest]
    fn dead_letter_leaves_attempts_untouched() {
        let resolution = AttemptResolution::DeadLettered {
            at: at(2),
            reason: "no handler".to_owned(),
        };
        let changes = outcome_changeset(&resolution);
        assert_eq!(changes.status, Some("dead_lettered"));
        assert_eq!(changes.attempts, None);
        assert_eq!(changes.failed_at, Some(Some(at(2))));
        assert_eq!(changes.claimed_at, Some(None));
    }

    #[rstest]
    fn stale_claim_cutoff_saturates() {
        assert_eq!(stale_claim_cutoff(at(10), Duration::from_secs(300)), at(5));
        assert_eq!(
            stale_claim_cutoff(at(10), Duration::MAX),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let err = map_pool_error(PoolError::checkout("timed out"));
        assert!(matches!(err, OutboxRepositoryError::Connection { .. }));
    }
}
