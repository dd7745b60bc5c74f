//! Correlation id shared by a request, the errors it raises and any work it
//! hands off.
//!
//! The id lives in a Tokio task-local. Spawned tasks start without one, so
//! work handed to `spawn` (webhook processing after the `202`) goes through
//! [`TraceId::carry`], and each relay job tick opens its own
//! [`TraceId::scope`].

use std::future::Future;

use tokio::task_local;
use uuid::Uuid;

task_local! {
    static CURRENT: TraceId;
}

/// A UUID identifying one request or one job cycle.
///
/// # Examples
/// ```
/// use booking_relay::TraceId;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let trace_id = TraceId::parse_header("00000000-0000-0000-0000-000000000000")
///     .expect("valid UUID");
/// let observed = TraceId::scope(trace_id, async move { TraceId::current() }).await;
/// assert_eq!(observed, Some(trace_id));
/// # });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(Uuid);

impl TraceId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Read an id supplied by a caller, tolerating surrounding whitespace.
    /// Anything that is not a UUID yields `None`.
    #[must_use]
    pub fn parse_header(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }

    /// The id in scope on this task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(|id| *id).ok()
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Run `fut` with `trace_id` in scope.
    pub async fn scope<Fut>(trace_id: TraceId, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        CURRENT.scope(trace_id, fut).await
    }

    /// Bind `fut` to the id in scope right now, minting one when none is.
    ///
    /// The id is captured when `carry` is called, not when the returned
    /// future is first polled, so the result can be handed to `spawn`.
    pub fn carry<Fut>(fut: Fut) -> impl Future<Output = Fut::Output>
    where
        Fut: Future,
    {
        let trace_id = Self::current().unwrap_or_else(Self::generate);
        Self::scope(trace_id, fut)
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TraceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
