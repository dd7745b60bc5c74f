//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL-backed repositories using Diesel ORM
//! - **handlers**: outbox delivery adapters (HTTP webhooks, logging)
//! - **metrics**: Prometheus-backed metrics exporters (feature-gated)
//!
//! Adapters are thin translators between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod persistence;
