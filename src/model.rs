//! Types flowing between the pipeline stages.
use chrono::{DateTime, Utc};
use url::Url;

use crate::db::Feed;

/// Unix seconds of the zero timestamp. Freshly added feeds carry it as
/// their `next_check`, which is why the poller's index scan starts here.
pub const ZERO_TIME_UNIX: i64 = -62135596800;

/// The timestamp meaning "unknown" or "never". Predates any feed.
pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_UNIX, 0).expect("zero time is representable")
}

/// A fetched feed document, not yet decoded.
#[derive(Debug, Clone)]
pub struct RawFeed {
    pub data: Vec<u8>,
    pub url: Url,
    pub fetched_at: DateTime<Utc>,
}

/// A decoded feed snapshot. `items` is sorted newest first; the updater
/// refuses snapshots that violate this.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: String,
    pub items: Vec<ParsedItem>,
    pub next_check_time: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

/// One normalized entry of a snapshot. `raw_id` is the digest of
/// whatever made the entry unique in the feed document; it never
/// includes the sequence id the service assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub raw_id: Vec<u8>,
    pub title: String,
    pub author: String,
    pub content: String,
    pub url: Option<Url>,
    pub pub_date: DateTime<Utc>,
}

/// Parser stage output handed to the updater.
#[derive(Debug, Clone)]
pub struct FeedParserOut {
    pub url: Url,
    pub data: ParsedFeed,
}

/// Updater stage output on success.
#[derive(Debug, Clone)]
pub struct UpdatedModel {
    pub url: Url,
    pub feed: Feed,
}

/// Terminal status of one feed's trip through the pipeline.
#[derive(Debug)]
pub struct FeedOutcome {
    pub url: Url,
    pub result: anyhow::Result<()>,
}
