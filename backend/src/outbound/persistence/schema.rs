//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match the migrations in `backend/migrations`
//! exactly. `diesel print-schema` regenerates them from a live database.

diesel::table! {
    /// Cached responses for critical write requests.
    ///
    /// Unique on (tenant_id, key_hash, endpoint, http_method).
    idempotency_keys (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        /// Hex SHA-256 of the client key.
        key_hash -> Text,
        original_key -> Text,
        endpoint -> Text,
        http_method -> Text,
        /// 32-byte SHA-256 of the canonical request body.
        request_hash -> Bytea,
        /// `in_progress` or `completed`.
        state -> Text,
        response_status -> Nullable<Int4>,
        response_body -> Nullable<Bytea>,
        /// JSON array of `{name, value}` objects.
        response_headers -> Jsonb,
        locked_until -> Nullable<Timestamptz>,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Transactional outbox.
    outbox_events (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        event_code -> Text,
        payload -> Jsonb,
        /// `ready`, `delivered`, `failed` or `dead_lettered`.
        status -> Text,
        ready_at -> Timestamptz,
        delivered_at -> Nullable<Timestamptz>,
        failed_at -> Nullable<Timestamptz>,
        attempts -> Int4,
        max_attempts -> Int4,
        last_attempt_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
        dedupe_key -> Nullable<Text>,
        metadata -> Jsonb,
        /// Worker currently holding the row.
        claimed_by -> Nullable<Text>,
        claimed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Inbound provider webhooks, unique on (provider, provider_event_id).
    webhook_inbox_events (id) {
        id -> Uuid,
        provider -> Text,
        provider_event_id -> Text,
        event_type -> Text,
        payload -> Jsonb,
        received_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
        claimed_until -> Nullable<Timestamptz>,
        attempts -> Int4,
        last_error -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(idempotency_keys, outbox_events, webhook_inbox_events);
