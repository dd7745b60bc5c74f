//! Shared HTTP adapter state.
//!
//! Handlers accept this state via `actix_web::web::Data` so they depend on
//! domain services only and remain testable without I/O.

use std::sync::Arc;

use crate::domain::inbox::InboxConsumer;

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub inbox: Arc<InboxConsumer>,
}

impl HttpState {
    /// Construct state around the inbox consumer used by the webhook receiver.
    pub fn new(inbox: Arc<InboxConsumer>) -> Self {
        Self { inbox }
    }
}
