//! Periodic relay jobs.
//!
//! Three independent loops drive the background services:
//!
//! - outbox: claim and deliver one batch per tick;
//! - inbox: re-run unprocessed webhooks, oldest first;
//! - retention: delete expired idempotency keys.
//!
//! A failed cycle is logged and the loop waits for the next tick. Missed
//! ticks are skipped rather than replayed in a burst. Every loop stops when
//! the shutdown channel flips to `true` or its sender is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::domain::inbox::InboxConsumer;
use crate::domain::outbox::OutboxPublisher;
use crate::domain::{Error, RetentionSweeper, TraceId};

/// Tick periods and batch sizes for [`RelayJobs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayJobsConfig {
    /// Delay between outbox publisher batches.
    pub outbox_interval: Duration,
    /// Delay between sweeps of unprocessed webhooks.
    pub inbox_interval: Duration,
    /// Delay between retention sweeps of expired idempotency keys.
    pub sweep_interval: Duration,
    /// Maximum webhooks re-run per inbox tick.
    pub inbox_batch_size: u32,
}

impl Default for RelayJobsConfig {
    fn default() -> Self {
        Self {
            outbox_interval: Duration::from_secs(5),
            inbox_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(3600),
            inbox_batch_size: 100,
        }
    }
}

/// Owns the services driven by the periodic loops.
pub struct RelayJobs {
    publisher: Arc<OutboxPublisher>,
    inbox: Arc<InboxConsumer>,
    sweeper: Arc<RetentionSweeper>,
    config: RelayJobsConfig,
}

impl RelayJobs {
    pub fn new(
        publisher: Arc<OutboxPublisher>,
        inbox: Arc<InboxConsumer>,
        sweeper: Arc<RetentionSweeper>,
        config: RelayJobsConfig,
    ) -> Self {
        Self {
            publisher,
            inbox,
            sweeper,
            config,
        }
    }

    /// Spawn the three loops on the Tokio runtime.
    ///
    /// Await the returned handles after signalling shutdown to let in-flight
    /// cycles finish.
    pub fn spawn(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let publisher = Arc::clone(&self.publisher);
        let inbox = Arc::clone(&self.inbox);
        let sweeper = Arc::clone(&self.sweeper);
        let inbox_batch = self.config.inbox_batch_size;

        vec![
            tokio::spawn(run_loop(
                "outbox",
                self.config.outbox_interval,
                shutdown.clone(),
                move || {
                    let publisher = Arc::clone(&publisher);
                    async move { publisher.run_batch().await.map(|_| ()) }
                },
            )),
            tokio::spawn(run_loop(
                "inbox",
                self.config.inbox_interval,
                shutdown.clone(),
                move || {
                    let inbox = Arc::clone(&inbox);
                    async move { inbox.process_pending(inbox_batch).await.map(|_| ()) }
                },
            )),
            tokio::spawn(run_loop(
                "retention",
                self.config.sweep_interval,
                shutdown.clone(),
                move || {
                    let sweeper = Arc::clone(&sweeper);
                    async move { sweeper.sweep().await.map(|_| ()) }
                },
            )),
        ]
    }
}

async fn run_loop<F, Fut>(
    job: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(job, period_secs = period.as_secs(), "relay job started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(err) = TraceId::scope(TraceId::generate(), cycle()).await {
            error!(job, code = ?err.code(), error = %err.message(), "relay job cycle failed");
        }
    }
    info!(job, "relay job stopped");
}
