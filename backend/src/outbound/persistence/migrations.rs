//! Embedded schema migrations applied at startup.
//!
//! `diesel_migrations` only drives synchronous connections, so the run happens
//! on a blocking thread with a short-lived `PgConnection`.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

/// Migrations from the `backend/migrations` directory.
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Errors raised while applying migrations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    /// Could not open the migration connection.
    #[error("failed to connect for migrations: {message}")]
    Connect { message: String },
    /// A migration failed to apply.
    #[error("failed to apply migrations: {message}")]
    Apply { message: String },
}

fn apply_pending(database_url: &str) -> Result<Vec<String>, MigrationError> {
    let mut conn = PgConnection::establish(database_url).map_err(|err| MigrationError::Connect {
        message: err.to_string(),
    })?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|err| MigrationError::Apply {
            message: err.to_string(),
        })?;
    Ok(applied.iter().map(ToString::to_string).collect())
}

/// Apply every pending migration and return the versions applied.
pub async fn run_migrations(database_url: &str) -> Result<Vec<String>, MigrationError> {
    let database_url = database_url.to_owned();
    let applied = tokio::task::spawn_blocking(move || apply_pending(&database_url))
        .await
        .map_err(|err| MigrationError::Apply {
            message: format!("migration task aborted: {err}"),
        })??;
    if applied.is_empty() {
        info!("database schema is up to date");
    } else {
        info!(versions = ?applied, "applied database migrations");
    }
    Ok(applied)
}
