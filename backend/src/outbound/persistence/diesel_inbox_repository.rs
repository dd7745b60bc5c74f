//! PostgreSQL-backed `InboxRepository` implementation using Diesel ORM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::domain::inbox::{NewWebhookInboxEvent, ProviderName, WebhookInboxEvent};
use crate::domain::ports::{InboxRepository, InboxRepositoryError};

use super::error_mapping::{self, count_from_db};
use super::models::{NewWebhookInboxEventRow, WebhookInboxEventRow};
use super::pool::{DbPool, PoolError};
use super::schema::webhook_inbox_events;

/// Diesel-backed implementation of the `InboxRepository` port.
#[derive(Clone)]
pub struct DieselInboxRepository {
    pool: DbPool,
}

impl DieselInboxRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> InboxRepositoryError {
    error_mapping::map_pool_error(error, InboxRepositoryError::connection)
}

fn map_diesel_error(
    operation: &'static str,
) -> impl FnOnce(diesel::result::Error) -> InboxRepositoryError {
    move |error| {
        error_mapping::map_diesel_error(
            error,
            operation,
            InboxRepositoryError::query,
            InboxRepositoryError::connection,
        )
    }
}

fn row_to_event(row: WebhookInboxEventRow) -> Result<WebhookInboxEvent, InboxRepositoryError> {
    let provider = ProviderName::new(row.provider).map_err(|err| {
        InboxRepositoryError::query(format!("inbox row {} has a corrupt provider: {err}", row.id))
    })?;
    Ok(WebhookInboxEvent {
        id: row.id,
        provider,
        provider_event_id: row.provider_event_id,
        event_type: row.event_type,
        payload: row.payload,
        received_at: row.received_at,
        processed_at: row.processed_at,
        claimed_until: row.claimed_until,
        attempts: count_from_db(row.attempts),
        last_error: row.last_error,
    })
}

#[async_trait]
impl InboxRepository for DieselInboxRepository {
    async fn insert(&self, event: &NewWebhookInboxEvent) -> Result<bool, InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = NewWebhookInboxEventRow {
            id: Uuid::new_v4(),
            provider: event.provider.as_str(),
            provider_event_id: &event.provider_event_id,
            event_type: &event.event_type,
            payload: &event.payload,
            received_at: event.received_at,
        };
        let inserted = diesel::insert_into(webhook_inbox_events::table)
            .values(&row)
            .on_conflict((
                webhook_inbox_events::provider,
                webhook_inbox_events::provider_event_id,
            ))
            .do_nothing()
            .execute(&mut conn)
            .await
            .map_err(map_diesel_error("store webhook event"))?;
        Ok(inserted == 1)
    }

    async fn find(
        &self,
        provider: &ProviderName,
        provider_event_id: &str,
    ) -> Result<Option<WebhookInboxEvent>, InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        webhook_inbox_events::table
            .filter(webhook_inbox_events::provider.eq(provider.as_str()))
            .filter(webhook_inbox_events::provider_event_id.eq(provider_event_id))
            .select(WebhookInboxEventRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error("load webhook event"))?
            .map(row_to_event)
            .transpose()
    }

    async fn try_claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            webhook_inbox_events::table
                .filter(webhook_inbox_events::id.eq(id))
                .filter(webhook_inbox_events::processed_at.is_null())
                .filter(
                    webhook_inbox_events::claimed_until
                        .is_null()
                        .or(webhook_inbox_events::claimed_until.le(now)),
                ),
        )
        .set(webhook_inbox_events::claimed_until.eq(Some(until)))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("claim webhook event"))?;
        Ok(updated == 1)
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(
            webhook_inbox_events::table
                .filter(webhook_inbox_events::id.eq(id))
                .filter(webhook_inbox_events::processed_at.is_null()),
        )
        .set((
            webhook_inbox_events::processed_at.eq(Some(now)),
            webhook_inbox_events::claimed_until.eq(None::<DateTime<Utc>>),
            webhook_inbox_events::last_error.eq(None::<String>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error("mark webhook event processed"))?;
        Ok(updated == 1)
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::update(
            webhook_inbox_events::table
                .filter(webhook_inbox_events::id.eq(id))
                .filter(webhook_inbox_events::processed_at.is_null()),
        )
        .set((
            webhook_inbox_events::attempts.eq(webhook_inbox_events::attempts + 1),
            webhook_inbox_events::last_error.eq(Some(error)),
            webhook_inbox_events::claimed_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map(|_| ())
        .map_err(map_diesel_error("record webhook failure"))
    }

    async fn list_unprocessed(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookInboxEvent>, InboxRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<WebhookInboxEventRow> = webhook_inbox_events::table
            .filter(webhook_inbox_events::processed_at.is_null())
            .filter(
                webhook_inbox_events::claimed_until
                    .is_null()
                    .or(webhook_inbox_events::claimed_until.le(now)),
            )
            .order(webhook_inbox_events::received_at.asc())
            .limit(i64::from(limit))
            .select(WebhookInboxEventRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error("list unprocessed webhook events"))?;
        rows.into_iter().map(row_to_event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn row(provider: &str) -> WebhookInboxEventRow {
        WebhookInboxEventRow {
            id: Uuid::new_v4(),
            provider: provider.to_owned(),
            provider_event_id: "evt_1".to_owned(),
            event_type: "charge.succeeded".to_owned(),
            payload: json!({"id": "evt_1"}),
            received_at: Utc
                .with_ymd_and_hms(2026, 3, 2, 9, 30, 0)
                .single()
                .expect("valid timestamp"),
            processed_at: None,
            claimed_until: None,
            attempts: 2,
            last_error: Some("ledger busy".to_owned()),
        }
    }

    #[rstest]
    fn rows_map_to_domain_events() {
        let event = row_to_event(row("stripe")).expect("valid row");
        assert_eq!(event.provider.as_str(), "stripe");
        assert_eq!(event.attempts, 2);
        assert!(!event.is_processed());
    }

    #[rstest]
    fn corrupt_provider_is_a_query_error() {
        let err = row_to_event(row("Not A Slug")).expect_err("corrupt provider");
        assert!(matches!(err, InboxRepositoryError::Query { .. }));
    }

    #[rstest]
    fn pool_error_maps_to_connection_error() {
        let err = map_pool_error(PoolError::build("bad url"));
        assert!(matches!(err, InboxRepositoryError::Connection { .. }));
        assert!(err.to_string().contains("bad url"));
    }
}
