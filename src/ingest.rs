use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::{Database, NewPost};
use crate::error::{GatorError, Result};
use crate::fetcher::RssItem;

/// Per-batch counts. Duplicates are expected on every pass and land in `skipped`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Parse an RSS `pubDate` (RFC 822 / 2822). Anything else is treated as undated.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Store each item as a post of `feed_id`, skipping URLs that are already stored.
///
/// Items are handled independently: a bad date drops only the timestamp and a
/// failed insert only that item. The batch fails as a whole only when every insert
/// attempted hit a database error.
pub async fn ingest_items(db: &Database, feed_id: i64, items: &[RssItem]) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut attempted = 0;
    let mut store_failures = 0;
    let mut last_store_error = None;

    for item in items {
        let link = item.link.trim();
        if link.is_empty() {
            warn!("Skipping item with no link: {}", item.title);
            report.failed += 1;
            continue;
        }

        let description = item.description.trim();
        let published_at = parse_pub_date(&item.pub_date);
        if published_at.is_none() && !item.pub_date.trim().is_empty() {
            debug!("Unrecognised publication date for {}: {}", link, item.pub_date);
        }

        let post = NewPost {
            feed_id,
            title: item.title.trim(),
            url: link,
            description: (!description.is_empty()).then_some(description),
            published_at,
        };

        attempted += 1;
        match db.create_post(&post).await {
            Ok(_) => report.inserted += 1,
            Err(GatorError::DuplicateKey(_)) => report.skipped += 1,
            Err(GatorError::Store(e)) => {
                warn!("Failed to store post {}: {}", link, e);
                report.failed += 1;
                store_failures += 1;
                last_store_error = Some(e);
            }
            Err(e) => {
                warn!("Failed to store post {}: {}", link, e);
                report.failed += 1;
            }
        }
    }

    if let Some(err) = last_store_error {
        if store_failures == attempted {
            return Err(GatorError::Store(err));
        }
    }

    Ok(report)
}
