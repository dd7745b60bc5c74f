//! Stored idempotency records and claim types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{IdempotencyKey, KeyHash, RequestHash};
use crate::domain::TenantId;

/// Identity of an idempotency row: the unique constraint columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyScope {
    /// Tenant that owns the request.
    pub tenant_id: TenantId,
    /// Hash of the client key.
    pub key_hash: KeyHash,
    /// Concrete request path.
    pub endpoint: String,
    /// Upper-case HTTP method.
    pub http_method: String,
}

impl IdempotencyScope {
    /// Build a scope for a request.
    pub fn new(
        tenant_id: TenantId,
        key: &IdempotencyKey,
        endpoint: impl Into<String>,
        http_method: impl AsRef<str>,
    ) -> Self {
        Self {
            tenant_id,
            key_hash: key.key_hash(),
            endpoint: endpoint.into(),
            http_method: http_method.as_ref().to_ascii_uppercase(),
        }
    }
}

/// One response header kept for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    /// Header name, lower case.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Response captured from the guarded handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
    /// Replayable headers.
    pub headers: Vec<StoredHeader>,
}

impl CachedResponse {
    /// Headers never written to the cache.
    pub const EXCLUDED_HEADERS: [&'static str; 11] = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "set-cookie",
        "trace-id",
        "content-length",
    ];

    /// Build a response, dropping headers that must not be replayed.
    pub fn new<I, N, V>(status: u16, body: Vec<u8>, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.as_ref().to_ascii_lowercase();
                (!Self::EXCLUDED_HEADERS.contains(&name.as_str())).then(|| StoredHeader {
                    name,
                    value: value.into(),
                })
            })
            .collect();
        Self {
            status,
            body,
            headers,
        }
    }

    /// Only non-5xx responses are stored; server errors stay retryable.
    pub fn is_cacheable(&self) -> bool {
        self.status < 500
    }
}

/// Lifecycle state of a stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyState {
    /// A request holds the key and has not finished yet.
    InProgress {
        /// The claim may be taken over after this instant.
        locked_until: DateTime<Utc>,
    },
    /// The first request finished; its response is replayed to retries.
    Completed(CachedResponse),
}

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Unique identity.
    pub scope: IdempotencyScope,
    /// Raw key, kept for operators only.
    pub original_key: String,
    /// Hash of the body that first used the key.
    pub request_hash: RequestHash,
    /// Current state.
    pub state: IdempotencyState,
    /// Row may be swept after this instant.
    pub expires_at: DateTime<Utc>,
    /// When the key was first claimed.
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Whether the retention window has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the row is an in-progress placeholder whose lease has lapsed.
    pub fn is_stale_claim(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, IdempotencyState::InProgress { locked_until } if locked_until <= now)
    }

    /// Seconds since the key was first claimed, floored at zero.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.created_at).num_seconds()).unwrap_or(0)
    }
}

/// Placeholder a request inserts before running business logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    /// Unique identity.
    pub scope: IdempotencyScope,
    /// Raw key, kept for operators only.
    pub original_key: String,
    /// Hash of the request body.
    pub request_hash: RequestHash,
    /// When the claim was made.
    pub claimed_at: DateTime<Utc>,
    /// Lease end for the in-progress state.
    pub locked_until: DateTime<Utc>,
    /// Expiry of the placeholder itself.
    pub expires_at: DateTime<Utc>,
}

/// Result of attempting to insert a claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the key and must run business logic.
    Claimed,
    /// Another request already holds or completed the key.
    Existing(IdempotencyRecord),
}
