use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::{Database, Feed};
use crate::error::{GatorError, Result};
use crate::fetcher::Fetcher;
use crate::ingest::{ingest_items, IngestReport};

#[derive(Debug)]
pub enum TickOutcome {
    /// There are no feeds at all.
    Idle,
    Polled { feed: Feed, report: IngestReport },
}

/// Shortest accepted `agg` interval. `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Parse the `agg` interval: a positive number of seconds, optionally suffixed `s`.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed);
    let seconds: f64 = number.parse().map_err(|_| {
        GatorError::Config(format!(
            "invalid interval '{}': expected a number of seconds",
            input
        ))
    })?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(GatorError::Config(format!(
            "invalid interval '{}': must be greater than zero",
            input
        )));
    }

    let interval = Duration::try_from_secs_f64(seconds)
        .map_err(|e| GatorError::Config(format!("invalid interval '{}': {}", input, e)))?;
    if interval < MIN_INTERVAL {
        return Err(GatorError::Config(format!(
            "invalid interval '{}': must be at least {:?}",
            input, MIN_INTERVAL
        )));
    }
    Ok(interval)
}

/// Returns a receiver that flips to `true` on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, finishing current tick"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = tx.send(true);
    });
    rx
}

pub struct Aggregator {
    db: Arc<Database>,
    fetcher: Fetcher,
}

impl Aggregator {
    pub fn new(db: Arc<Database>, fetcher: Fetcher) -> Self {
        Self { db, fetcher }
    }

    /// One pass of the pipeline: claim the stalest feed, fetch it, store its items.
    ///
    /// The claim is written before the fetch, so a feed that fails to download
    /// waits for its next turn in the rotation. Failures are logged here, with the
    /// claimed feed when there is one, before being returned.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let feed = match self.db.claim_next_feed().await {
            Ok(feed) => feed,
            Err(GatorError::NotFound(_)) => return Ok(TickOutcome::Idle),
            Err(e) => {
                error!("Failed to claim next feed: {}", e);
                return Err(e);
            }
        };

        info!(feed = %feed.name, url = %feed.url, "Fetching feed");
        let report = match self.collect(&feed).await {
            Ok(report) => report,
            Err(e) => {
                error!(feed = %feed.name, url = %feed.url, "Feed collection failed: {}", e);
                return Err(e);
            }
        };

        Ok(TickOutcome::Polled { feed, report })
    }

    async fn collect(&self, feed: &Feed) -> Result<IngestReport> {
        let rss = self.fetcher.fetch_feed(&feed.url).await?;
        ingest_items(&self.db, feed.id, &rss.channel.items).await
    }

    /// Tick every `interval` until `shutdown` becomes true or its sender is dropped.
    ///
    /// Shutdown is only observed between ticks; a running tick always completes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Collecting feeds every {:?}", interval);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(TickOutcome::Idle) => debug!("No feeds to fetch"),
                Ok(TickOutcome::Polled { feed, report }) => info!(
                    feed = %feed.name,
                    url = %feed.url,
                    inserted = report.inserted,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Collected feed"
                ),
                // Already logged by `tick`.
                Err(_) => {}
            }
        }

        info!("Aggregator stopped");
    }
}
