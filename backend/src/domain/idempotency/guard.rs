//! Claim-first idempotency guard for critical write endpoints.
//!
//! A request first inserts an in-progress placeholder under the unique
//! (tenant, key hash, endpoint, method) index. Only the winner of that insert
//! runs business logic. Everyone else reads the winner's row and either
//! replays the stored response, waits for it to appear, or is rejected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{
    CachedResponse, ClaimOutcome, CriticalEndpoint, IdempotencyClaim, IdempotencyConfig,
    IdempotencyKey, IdempotencyRecord, IdempotencyScope, IdempotencyState, RequestHash,
    hash_request_body,
};
use crate::domain::ports::{
    ConflictKind, GuardOutcome, IdempotencyMetricLabels, IdempotencyMetrics, IdempotencyRepository,
};
use crate::domain::runtime::{Sleeper, TokioSleeper, instant_after};
use crate::domain::{Error, TenantId};

/// Detail code attached to conflicts caused by reusing a key with a new body.
pub const KEY_REUSE_CODE: &str = "idempotency_key_reuse";
/// Detail code attached to conflicts caused by a request still in flight.
pub const IN_PROGRESS_CODE: &str = "idempotency_request_in_progress";

/// Everything the guard needs to know about an inbound critical request.
#[derive(Debug, Clone)]
pub struct GuardRequest {
    tenant_id: TenantId,
    key: IdempotencyKey,
    endpoint: CriticalEndpoint,
    scope: IdempotencyScope,
    request_hash: RequestHash,
}

impl GuardRequest {
    /// Build a request descriptor, hashing `body`.
    pub fn new(
        tenant_id: TenantId,
        key: IdempotencyKey,
        endpoint: CriticalEndpoint,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<Self, Error> {
        let request_hash = hash_request_body(body)
            .map_err(|err| Error::internal(format!("failed to hash request body: {err}")))?;
        let scope = IdempotencyScope::new(tenant_id, &key, path, method);
        Ok(Self {
            tenant_id,
            key,
            endpoint,
            scope,
            request_hash,
        })
    }

    /// Unique identity of the request's row.
    pub fn scope(&self) -> &IdempotencyScope {
        &self.scope
    }

    /// Hash of the request body.
    pub fn request_hash(&self) -> &RequestHash {
        &self.request_hash
    }
}

/// Proof that the caller owns a claimed key and must report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardTicket {
    scope: IdempotencyScope,
    endpoint: CriticalEndpoint,
}

impl GuardTicket {
    /// Scope the ticket covers.
    pub fn scope(&self) -> &IdempotencyScope {
        &self.scope
    }
}

/// What the caller should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Run business logic, then hand the ticket to [`IdempotencyGuard::finish`].
    Proceed(GuardTicket),
    /// Return the stored response without running business logic.
    Replay(CachedResponse),
}


enum Inspection {
    Decided(GuardDecision),
    TakeOver,
    Wait,
}

/// Idempotency guard service.
pub struct IdempotencyGuard {
    repository: Arc<dyn IdempotencyRepository>,
    metrics: Arc<dyn IdempotencyMetrics>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    /// Create a guard that sleeps on the Tokio timer while waiting.
    pub fn new(
        repository: Arc<dyn IdempotencyRepository>,
        metrics: Arc<dyn IdempotencyMetrics>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            repository,
            metrics,
            clock,
            sleeper: Arc::new(TokioSleeper),
            config,
        }
    }

    /// Replace the sleeper used between polls.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Claim the request's key or resolve it against the stored row.
    ///
    /// # Errors
    ///
    /// - `conflict` when the key was used with a different body, or when a
    ///   concurrent request holds the key for longer than the maximum wait.
    /// - `service_unavailable` when the store cannot be reached.
    pub async fn begin(&self, request: &GuardRequest) -> Result<GuardDecision, Error> {
        let tenant_scope = tenant_scope_hash(&request.tenant_id);
        let mut waited = Duration::ZERO;
        loop {
            let now = self.clock.utc();
            let claim = self.claim_for(request, now);
            let existing = match self
                .repository
                .claim(&claim)
                .await
                .map_err(Error::from)?
            {
                ClaimOutcome::Claimed => {
                    return Ok(self
                        .proceed(request, &tenant_scope, GuardOutcome::Miss, None)
                        .await);
                }
                ClaimOutcome::Existing(record) => record,
            };

            match self.inspect(request, &existing, now, &tenant_scope).await? {
                Inspection::Decided(decision) => return Ok(decision),
                Inspection::TakeOver => {
                    let taken = self
                        .repository
                        .take_over(&claim, now)
                        .await
                        .map_err(Error::from)?;
                    if taken {
                        debug!(endpoint = %request.endpoint, "took over lapsed idempotency key");
                        return Ok(self
                            .proceed(
                                request,
                                &tenant_scope,
                                GuardOutcome::TakeOver,
                                Some(existing.created_at),
                            )
                            .await);
                    }
                }
                Inspection::Wait => {}
            }

            // Lost a take-over race or the key is still held: wait for the holder.
            if waited >= self.config.max_wait() {
                self.record_outcome(
                    GuardOutcome::Conflict(ConflictKind::InFlight),
                    Some(existing.created_at),
                    &tenant_scope,
                    request.endpoint,
                )
                .await;
                warn!(
                    tenant_id = %request.tenant_id,
                    endpoint = %request.endpoint,
                    "idempotency key still in progress after waiting"
                );
                return Err(
                    Error::conflict("request with this idempotency key is still in progress")
                        .with_reason(IN_PROGRESS_CODE),
                );
            }
            self.sleeper.sleep(self.config.poll_interval()).await;
            waited = waited.saturating_add(self.config.poll_interval());
        }
    }

    /// Persist the handler's response for future replays.
    ///
    /// Server errors are not cached: the placeholder is released so the client
    /// may retry with the same key. Storage failures are logged and swallowed.
    pub async fn finish(&self, ticket: GuardTicket, response: &CachedResponse) {
        if !response.is_cacheable() {
            debug!(status = response.status, "releasing idempotency key after server error");
            self.abandon(ticket).await;
            return;
        }
        let now = self.clock.utc();
        let expires_at = instant_after(now, self.config.ttl());
        match self
            .repository
            .complete(&ticket.scope, response, expires_at, now)
            .await
        {
            Ok(()) => info!(
                tenant_id = %ticket.scope.tenant_id,
                endpoint = %ticket.endpoint,
                status = response.status,
                "idempotency key stored"
            ),
            Err(err) => {
                warn!(
                    error = %err,
                    endpoint = %ticket.endpoint,
                    "failed to store idempotent response; releasing key"
                );
                self.abandon(ticket).await;
            }
        }
    }

    /// Release a claimed key without storing a response.
    pub async fn abandon(&self, ticket: GuardTicket) {
        if let Err(err) = self.repository.release(&ticket.scope).await {
            warn!(error = %err, endpoint = %ticket.endpoint, "failed to release idempotency key");
        }
    }

    fn claim_for(&self, request: &GuardRequest, now: DateTime<Utc>) -> IdempotencyClaim {
        IdempotencyClaim {
            scope: request.scope.clone(),
            original_key: request.key.as_str().to_owned(),
            request_hash: request.request_hash.clone(),
            claimed_at: now,
            locked_until: instant_after(now, self.config.in_progress_lease()),
            expires_at: instant_after(now, self.config.ttl()),
        }
    }

    async fn proceed(
        &self,
        request: &GuardRequest,
        tenant_scope: &str,
        outcome: GuardOutcome,
        key_created_at: Option<DateTime<Utc>>,
    ) -> GuardDecision {
        self.record_outcome(outcome, key_created_at, tenant_scope, request.endpoint)
            .await;
        GuardDecision::Proceed(GuardTicket {
            scope: request.scope.clone(),
            endpoint: request.endpoint,
        })
    }

    async fn inspect(
        &self,
        request: &GuardRequest,
        existing: &IdempotencyRecord,
        now: DateTime<Utc>,
        tenant_scope: &str,
    ) -> Result<Inspection, Error> {
        if existing.is_expired(now) {
            return Ok(Inspection::TakeOver);
        }
        if existing.request_hash != request.request_hash {
            self.record_outcome(
                GuardOutcome::Conflict(ConflictKind::KeyReuse),
                Some(existing.created_at),
                tenant_scope,
                request.endpoint,
            )
            .await;
            warn!(
                tenant_id = %request.tenant_id,
                endpoint = %request.endpoint,
                "idempotency key reused with a different payload"
            );
            return Err(
                Error::conflict("idempotency key already used with a different payload")
                    .with_reason(KEY_REUSE_CODE),
            );
        }
        match &existing.state {
            IdempotencyState::Completed(response) => {
                self.record_outcome(
                    GuardOutcome::Hit,
                    Some(existing.created_at),
                    tenant_scope,
                    request.endpoint,
                )
                .await;
                info!(
                    tenant_id = %request.tenant_id,
                    endpoint = %request.endpoint,
                    age_seconds = existing.age_seconds(now),
                    "idempotency key used"
                );
                Ok(Inspection::Decided(GuardDecision::Replay(response.clone())))
            }
            IdempotencyState::InProgress { .. } if existing.is_stale_claim(now) => {
                Ok(Inspection::TakeOver)
            }
            IdempotencyState::InProgress { .. } => Ok(Inspection::Wait),
        }
    }

    /// Exporter failures are logged and dropped.
    async fn record_outcome(
        &self,
        outcome: GuardOutcome,
        key_created_at: Option<DateTime<Utc>>,
        tenant_scope: &str,
        endpoint: CriticalEndpoint,
    ) {
        let now = self.clock.utc();
        let labels = IdempotencyMetricLabels {
            tenant_scope: tenant_scope.to_owned(),
            endpoint: endpoint.as_str().to_owned(),
            age_bucket: key_created_at.map(|created_at| calculate_age_bucket(created_at, now)),
        };
        if let Err(err) = self.metrics.record(outcome, &labels).await {
            debug!(error = %err, outcome = outcome.as_str(), "idempotency metric dropped");
        }
    }
}


/// Bucket a key's age for metrics.
///
/// Negative ages (clock skew) land in `0-1m`.
pub(crate) fn calculate_age_bucket(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - created_at).num_minutes().max(0);
    match minutes {
        0 => "0-1m",
        1..=4 => "1-5m",
        5..=29 => "5-30m",
        30..=119 => "30m-2h",
        120..=359 => "2h-6h",
        360..=1439 => "6h-24h",
        _ => ">24h",
    }
    .to_owned()
}

/// First 8 hex characters of the SHA-256 of the tenant id.
pub(crate) fn tenant_scope_hash(tenant_id: &TenantId) -> String {
    let hash = Sha256::digest(tenant_id.to_string().as_bytes());
    hex::encode(hash.get(..4).unwrap_or_default())
}
