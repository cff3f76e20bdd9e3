//! The feed updater: reconciles a parsed snapshot against the stored
//! feed record and its item records.
//!
//! An update runs in phases. Load the feed and recover any half-finished
//! previous update (A), plan the item inserts, updates, and deletions
//! (B), save the plan as a checkpoint (C), then execute the child-record
//! writes concurrently and save again to finalize (D). Dying between C
//! and D is safe: the next update finds the promised keys in
//! `inserted_item_keys` and keeps exactly those whose item record
//! actually landed.
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use url::Url;

use super::keys::{find_raw_item_id, ItemKey};
use super::model::{url_key, Feed, FeedItem};
use crate::model::{zero_time, ParsedFeed, ParsedItem};
use crate::store::{Client, Stored, StoreError, ITEMS_BUCKET};

/// Hard cap on items retained per feed.
pub const MAXIMUM_FEED_ITEMS: usize = 10_000;

/// Monotonically increasing supply of sequence ids. Thread-safe and
/// infinite by contract; draining never blocks.
#[derive(Debug, Default)]
pub struct IdSource(AtomicU64);

impl IdSource {
    pub fn new() -> Self {
        IdSource::default()
    }

    /// Starts the sequence at `first`. Tests use this to pin the exact
    /// keys an update will produce.
    pub fn starting_at(first: u64) -> Self {
        IdSource(AtomicU64::new(first))
    }

    pub fn next_id(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Aggregation of the child-record failures of one update. The feed
/// record stays at the planning checkpoint, so the next run recovers.
#[derive(Debug)]
pub struct MultiError(pub Vec<StoreError>);

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} child operations failed", self.0.len())?;
        for err in &self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("feed is not registered in the store")]
    FeedNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Multi(#[from] MultiError),
}

/// Applies `snapshot` to the feed stored under `feed_url` and returns
/// the finalized record.
///
/// `snapshot.items` must be sorted newest first; that is the parser's
/// contract, and a violation here is a programming error, so it panics.
#[instrument(skip_all, fields(url = %feed_url))]
pub async fn update_feed(
    client: &Client,
    feed_url: &Url,
    snapshot: ParsedFeed,
    ids: &IdSource,
) -> Result<Feed, UpdateError> {
    let ParsedFeed {
        title,
        items,
        next_check_time,
        fetched_at,
    } = snapshot;
    assert!(
        items
            .windows(2)
            .all(|pair| pair[0].pub_date >= pair[1].pub_date),
        "snapshot items must be sorted newest first",
    );

    // Phase A: load, then fold in the promises of an interrupted update.
    // A promised key whose item record landed joins the live list; one
    // whose record never made it is dropped.
    let mut stored = match client.load::<Feed>(&url_key(feed_url)).await {
        Ok(stored) => stored,
        Err(StoreError::NotFound) => return Err(UpdateError::FeedNotFound),
        Err(err) => return Err(err.into()),
    };
    for item_key in std::mem::take(&mut stored.record.inserted_item_keys) {
        if client.exists(ITEMS_BUCKET, &item_key.store_key()).await? {
            stored.record.item_keys.push(item_key);
        }
    }

    // Phase B: basic attributes straight from the snapshot. The
    // next_check_int index follows next_check at save time.
    stored.record.title = title;
    stored.record.next_check = next_check_time;
    stored.record.last_check = fetched_at;

    // Partition the snapshot into inserts and updates, retiring stored
    // items as needed along the way.
    let mut new_items: Vec<ParsedItem> = Vec::new();
    let mut updated_items: Vec<(ItemKey, ParsedItem, Stored<FeedItem>)> = Vec::new();
    let mut seen_raw_ids: HashSet<Vec<u8>> = HashSet::new();

    for item in items {
        // The first occurrence of a raw id wins; the snapshot is
        // newest-first, so later duplicates are stale copies.
        if !seen_raw_ids.insert(item.raw_id.clone()) {
            continue;
        }

        let feed = &mut stored.record;
        if let Some(index) = find_raw_item_id(&feed.item_keys, &item.raw_id) {
            let item_key = feed.item_keys[index].clone();
            let model = client.load::<FeedItem>(&item_key.store_key()).await?;

            // Same pub date means update in place, unless the date is
            // unknown and the content moved, which counts as a new
            // publication. A changed date retires the old key and
            // re-issues the item so it rises to the top.
            let unchanged = model.record.pub_date == item.pub_date
                && !(item.pub_date == zero_time() && model.record.differs_from(&item));
            if unchanged {
                updated_items.push((item_key, item, model));
            } else {
                feed.deleted_item_keys.push(item_key);
                feed.item_keys.remove(index);
                new_items.push(item);
            }
        } else {
            // Make room under the cap, evicting oldest first. An evicted
            // key pending update becomes a no-op.
            while feed.item_keys.len() + new_items.len() >= MAXIMUM_FEED_ITEMS
                && !feed.item_keys.is_empty()
            {
                let last_key = feed.item_keys.pop().expect("non-empty item keys");
                updated_items.retain(|(key, _, _)| *key != last_key);
                feed.deleted_item_keys.push(last_key);
            }

            if new_items.len() < MAXIMUM_FEED_ITEMS {
                new_items.push(item);
            }
        }
    }

    // Assign sequence ids oldest-first so id order matches age order
    // within the batch.
    let mut planned: Vec<(ItemKey, ParsedItem)> = Vec::with_capacity(new_items.len());
    for item in new_items.into_iter().rev() {
        let key = ItemKey::new(ids.next_id(), &item.raw_id);
        stored.record.inserted_item_keys.push(key.clone());
        planned.push((key, item));
    }

    // Phase C: the planning checkpoint. Everything promised here is
    // either carried out below or recovered by the next run.
    stored.record.item_keys.sort_unstable_by(|a, b| b.cmp(a));
    stored.record.inserted_item_keys.sort_unstable_by(|a, b| b.cmp(a));
    stored.record.deleted_item_keys.sort_unstable_by(|a, b| b.cmp(a));
    client.save(&mut stored).await?;

    debug!(
        new = planned.len(),
        updated = updated_items.len(),
        deleted = stored.record.deleted_item_keys.len(),
        "planned feed changes",
    );

    // Phase D: child-record writes, dispatched concurrently with results
    // streaming back over one channel.
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<(), StoreError>>();
    let mut expected = 0usize;

    for (key, item) in planned {
        stored.record.item_keys.push(key.clone());
        let client = client.clone();
        let tx = tx.clone();
        expected += 1;
        tokio::spawn(async move {
            let _ = tx.send(insert_item(&client, key, item).await);
        });
    }
    stored.record.inserted_item_keys.clear();

    for (_, item, model) in updated_items {
        let client = client.clone();
        let tx = tx.clone();
        expected += 1;
        tokio::spawn(async move {
            let _ = tx.send(update_item(&client, item, model).await);
        });
    }

    for key in stored.record.deleted_item_keys.drain(..) {
        let client = client.clone();
        let tx = tx.clone();
        expected += 1;
        tokio::spawn(async move {
            let _ = tx.send(client.delete(ITEMS_BUCKET, &key.store_key()).await);
        });
    }
    drop(tx);

    let mut errors = Vec::new();
    for _ in 0..expected {
        let result = rx.recv().await.expect("child task result");
        if let Err(err) = result {
            errors.push(err);
        }
    }
    if !errors.is_empty() {
        return Err(MultiError(errors).into());
    }

    // Finalization checkpoint: all promises kept, lists clean.
    stored.record.item_keys.sort_unstable_by(|a, b| b.cmp(a));
    client.save(&mut stored).await?;

    Ok(stored.record)
}

/// Writes the item record for a newly planned key. A record already
/// present under the key is left untouched: it was written by a partial
/// prior run of the same plan.
async fn insert_item(client: &Client, key: ItemKey, data: ParsedItem) -> Result<(), StoreError> {
    match client.load::<FeedItem>(&key.store_key()).await {
        Ok(_) => Ok(()),
        Err(StoreError::NotFound) => {
            let mut stored = Stored::new(key.store_key(), FeedItem::from_parsed(&data));
            client.save(&mut stored).await
        }
        Err(err) => Err(err),
    }
}

/// Overwrites an existing item record with the snapshot fields.
async fn update_item(
    client: &Client,
    data: ParsedItem,
    mut model: Stored<FeedItem>,
) -> Result<(), StoreError> {
    model.record.apply(&data);
    client.save(&mut model).await
}
