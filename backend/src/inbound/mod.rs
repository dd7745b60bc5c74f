//! Inbound adapters that translate external triggers into domain service
//! calls while keeping framework details at the edge.
//!
//! - [`http`]: Actix handlers (health probes, webhook receiver) and header
//!   parsing shared with the idempotency middleware.
//! - [`jobs`]: periodic loops driving the outbox, inbox and retention
//!   services.

pub mod http;
pub mod jobs;
