//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the relay's repository ports, backed by
//! PostgreSQL via `diesel-async` and a `bb8` connection pool.
//!
//! # Architecture
//!
//! - **Thin adapters**: repositories translate between Diesel rows and domain
//!   types. Retry, backoff and replay decisions stay in the domain services.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) are never exposed to the domain layer.
//! - **Conditional writes**: every state transition filters on the state it
//!   expects, so a caller that lost a race changes nothing.
//! - **Stable errors**: Diesel errors become port errors with fixed messages;
//!   SQL text never reaches a response.
//!
//! # Example
//!
//! ```ignore
//! use booking_relay::outbound::persistence::{DbPool, DieselOutboxRepository, PoolConfig};
//!
//! run_migrations(&database_url).await?;
//! let pool = DbPool::new(PoolConfig::new(&database_url)).await?;
//! let outbox = DieselOutboxRepository::new(pool);
//! ```

mod diesel_idempotency_repository;
mod diesel_inbox_repository;
mod diesel_outbox_repository;
mod error_mapping;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_idempotency_repository::DieselIdempotencyRepository;
pub use diesel_inbox_repository::DieselInboxRepository;
pub use diesel_outbox_repository::{DieselOutboxRepository, emit_event_in};
pub use migrations::{MigrationError, run_migrations};
pub use pool::{DbPool, PoolConfig, PoolError, PoolStatus, RelayConnection};
