//! HTTP inbound adapter.

pub mod error;
pub mod health;
pub mod idempotency;
pub mod state;
pub mod webhooks;
