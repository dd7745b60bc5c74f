//! Re-arm failed or dead-lettered outbox events for another delivery round.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::env;
use std::io::{self, Write};
use std::sync::Arc;

use booking_relay::domain::outbox::{OutboxHandlers, OutboxPublisher, OutboxPublisherConfig};
use booking_relay::outbound::persistence::{DbPool, DieselOutboxRepository, PoolConfig};
use clap::Parser;
use color_eyre::eyre::{WrapErr, eyre};
use mockable::DefaultClock;
use uuid::Uuid;

const DATABASE_URL_ENV: &str = "RELAY_DATABASE_URL";

/// `outbox-replay` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "outbox-replay",
    about = "Reset failed or dead-lettered outbox events to ready",
    version
)]
struct CliArgs {
    /// Events to replay.
    #[arg(long = "event-id", value_name = "uuid", required = true)]
    event_ids: Vec<Uuid>,
    /// Database connection URL. Falls back to `RELAY_DATABASE_URL` when omitted.
    #[arg(long = "database-url", value_name = "url")]
    database_url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = CliArgs::parse();
    let database_url = args
        .database_url
        .or_else(|| env::var(DATABASE_URL_ENV).ok())
        .ok_or_else(|| eyre!("pass --database-url or set {DATABASE_URL_ENV}"))?;

    let pool = DbPool::new(PoolConfig::new(&database_url).with_max_size(1))
        .await
        .wrap_err("failed to build database pool")?;
    // Replay never dispatches, so no handlers are registered.
    let publisher = OutboxPublisher::new(
        Arc::new(DieselOutboxRepository::new(pool)),
        OutboxHandlers::new(),
        Arc::new(DefaultClock),
        OutboxPublisherConfig::new("outbox-replay"),
    );

    let mut stdout = io::stdout().lock();
    let mut failures = 0_usize;
    for event_id in args.event_ids {
        match publisher.replay(event_id).await {
            Ok(()) => writeln!(stdout, "replayed {event_id}")?,
            Err(err) => {
                failures += 1;
                writeln!(stdout, "skipped {event_id}: {}", err.message())?;
            }
        }
    }
    if failures > 0 {
        return Err(eyre!("{failures} event(s) could not be replayed"));
    }
    Ok(())
}
