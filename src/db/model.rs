//! Persisted feed and item records, including sibling resolution.
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::keys::{make_hash, ItemKey};
use crate::model::{zero_time, ParsedItem};
use crate::sorted::{merge_descending, remove_all};
use crate::store::{Record, FEEDS_BUCKET, ITEMS_BUCKET};

/// Secondary index mapping `next_check` Unix seconds to the feed key.
/// The poller range-scans it to find feeds due for a fetch.
pub const NEXT_CHECK_INDEX: &str = "next_check_int";

/// Key of the feed record for `url` in the feeds bucket.
pub fn url_key(url: &Url) -> String {
    URL_SAFE.encode(make_hash(url.as_str()))
}

/// A subscribed feed. `item_keys` is kept strictly descending (newest
/// first); `inserted_item_keys` and `deleted_item_keys` hold the keys an
/// in-flight update has promised to create or remove, so an interrupted
/// update can be recovered from the record alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub url: Url,

    pub title: String,
    pub last_check: DateTime<Utc>,

    pub item_keys: Vec<ItemKey>,
    #[serde(rename = "inserted_items")]
    pub inserted_item_keys: Vec<ItemKey>,
    #[serde(rename = "deleted_items")]
    pub deleted_item_keys: Vec<ItemKey>,

    pub next_check: DateTime<Utc>,
}

impl Feed {
    /// An empty feed that the next poll sweep will pick up.
    pub fn new(url: Url) -> Self {
        Feed {
            url,
            title: String::new(),
            last_check: zero_time(),
            item_keys: Vec::new(),
            inserted_item_keys: Vec::new(),
            deleted_item_keys: Vec::new(),
            next_check: zero_time(),
        }
    }

    pub fn url_key(&self) -> String {
        url_key(&self.url)
    }
}

impl Record for Feed {
    const BUCKET: &'static str = FEEDS_BUCKET;

    fn indexes(&self) -> Vec<(&'static str, String)> {
        vec![(NEXT_CHECK_INDEX, self.next_check.timestamp().to_string())]
    }

    /// Semilattice join over siblings: the latest `last_check` wins the
    /// scalar fields, the key lists merge, and then deletion dominates
    /// presence dominates insertion.
    fn resolve(siblings: Vec<Self>) -> Self {
        let mut iter = siblings.into_iter();
        let mut resolved = iter.next().expect("resolve requires a sibling");

        for sibling in iter {
            if sibling.last_check > resolved.last_check {
                resolved.title = sibling.title;
                resolved.last_check = sibling.last_check;
                resolved.next_check = sibling.next_check;
            }

            resolved.item_keys = merge_descending(&resolved.item_keys, &sibling.item_keys);
            resolved.inserted_item_keys =
                merge_descending(&resolved.inserted_item_keys, &sibling.inserted_item_keys);
            resolved.deleted_item_keys =
                merge_descending(&resolved.deleted_item_keys, &sibling.deleted_item_keys);
        }

        // An insert some sibling already committed is complete; one any
        // sibling retracted stays retracted; and deleted keys never
        // reappear in the live list.
        remove_all(&mut resolved.inserted_item_keys, &resolved.item_keys);
        remove_all(&mut resolved.inserted_item_keys, &resolved.deleted_item_keys);
        remove_all(&mut resolved.item_keys, &resolved.deleted_item_keys);

        resolved
    }
}

/// One stored feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub author: String,
    pub content: String,

    pub url: Option<Url>,

    #[serde(rename = "publication_date")]
    pub pub_date: DateTime<Utc>,
}

impl FeedItem {
    pub fn from_parsed(data: &ParsedItem) -> Self {
        FeedItem {
            title: data.title.clone(),
            author: data.author.clone(),
            content: data.content.clone(),
            url: data.url.clone(),
            pub_date: data.pub_date,
        }
    }

    /// Overwrites the stored fields with a fresh snapshot of the entry.
    pub fn apply(&mut self, data: &ParsedItem) {
        self.title = data.title.clone();
        self.author = data.author.clone();
        self.content = data.content.clone();
        self.url = data.url.clone();
        self.pub_date = data.pub_date;
    }

    /// Whether the stored record no longer matches the snapshot entry.
    pub fn differs_from(&self, data: &ParsedItem) -> bool {
        self.title != data.title
            || self.author != data.author
            || self.content != data.content
            || self.url != data.url
            || self.pub_date != data.pub_date
    }
}

impl Record for FeedItem {
    const BUCKET: &'static str = ITEMS_BUCKET;

    /// Whatever claims the latest publication wins outright; ties keep
    /// the first-seen sibling.
    fn resolve(siblings: Vec<Self>) -> Self {
        let mut iter = siblings.into_iter();
        let mut resolved = iter.next().expect("resolve requires a sibling");

        for sibling in iter {
            if sibling.pub_date > resolved.pub_date {
                resolved = sibling;
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64, raw: &str) -> ItemKey {
        ItemKey::new(id, raw.as_bytes())
    }

    fn feed_at(title: &str, last_check: DateTime<Utc>) -> Feed {
        let mut feed = Feed::new(Url::parse("http://example.com/feed.rss").unwrap());
        feed.title = title.to_string();
        feed.last_check = last_check;
        feed.next_check = last_check + chrono::Duration::hours(1);
        feed
    }

    #[test]
    fn latest_check_wins_scalar_fields() {
        let older = feed_at("First Title", "2013-07-01T00:00:00Z".parse().unwrap());
        let newer = feed_at("Second Title", "2013-07-01T12:00:00Z".parse().unwrap());
        let expected_next = newer.next_check;

        let resolved = Feed::resolve(vec![older, newer]);
        assert_eq!(resolved.title, "Second Title");
        assert_eq!(resolved.next_check, expected_next);
        assert_eq!(
            resolved.indexes(),
            vec![(NEXT_CHECK_INDEX, expected_next.timestamp().to_string())]
        );
    }

    #[test]
    fn deletion_dominates_presence_dominates_insertion() {
        let mut a = feed_at("a", "2013-07-01T00:00:00Z".parse().unwrap());
        a.item_keys = vec![key(10, "A"), key(8, "B")];
        a.deleted_item_keys = vec![key(40, "CC"), key(30, "DD")];
        a.inserted_item_keys = vec![key(10, "IA"), key(8, "IB")];

        let mut b = feed_at("b", "2013-07-01T01:00:00Z".parse().unwrap());
        b.item_keys = vec![key(100, "AA"), key(8, "B"), key(2, "E")];
        b.inserted_item_keys = vec![key(8, "IB"), key(2, "IE")];

        let resolved = Feed::resolve(vec![a, b]);
        assert_eq!(
            resolved.item_keys,
            vec![key(100, "AA"), key(10, "A"), key(8, "B"), key(2, "E")]
        );
        assert_eq!(
            resolved.inserted_item_keys,
            vec![key(10, "IA"), key(8, "IB"), key(2, "IE")]
        );
        assert_eq!(
            resolved.deleted_item_keys,
            vec![key(40, "CC"), key(30, "DD")]
        );
    }

    #[test]
    fn an_insert_committed_by_any_sibling_is_complete() {
        let mut a = feed_at("a", "2013-07-01T00:00:00Z".parse().unwrap());
        a.item_keys = vec![key(100, "AA"), key(10, "A"), key(8, "B")];
        a.inserted_item_keys = vec![key(100, "AA"), key(10, "IA")];

        let mut b = feed_at("b", "2013-07-01T01:00:00Z".parse().unwrap());
        b.item_keys = vec![key(100, "AA"), key(8, "B")];
        b.inserted_item_keys = vec![key(40, "CC")];
        b.deleted_item_keys = vec![key(40, "CC")];

        let resolved = Feed::resolve(vec![a, b]);
        // AA completed; CC was retracted before completing.
        assert_eq!(resolved.inserted_item_keys, vec![key(10, "IA")]);
        assert_eq!(
            resolved.item_keys,
            vec![key(100, "AA"), key(10, "A"), key(8, "B")]
        );
    }

    #[test]
    fn feed_wire_format_is_stable() {
        let mut feed = feed_at("Wire", "2013-07-01T00:00:00Z".parse().unwrap());
        feed.item_keys = vec![key(1, "x")];

        let json = serde_json::to_value(&feed).unwrap();
        let object = json.as_object().unwrap();
        for field in [
            "url",
            "title",
            "last_check",
            "item_keys",
            "inserted_items",
            "deleted_items",
            "next_check",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn item_with_latest_pub_date_wins_verbatim() {
        let older = FeedItem {
            title: "First Title".into(),
            author: "Author 1".into(),
            content: "Content 1".into(),
            url: Some(Url::parse("http://example.com/story_up_1").unwrap()),
            pub_date: "2013-07-01T00:00:00Z".parse().unwrap(),
        };
        let newer = FeedItem {
            title: "Second Title".into(),
            author: "Author 2".into(),
            content: "Content 2".into(),
            url: Some(Url::parse("http://example.com/story_up_2").unwrap()),
            pub_date: "2014-07-01T00:00:00Z".parse().unwrap(),
        };

        let resolved = FeedItem::resolve(vec![older.clone(), newer.clone()]);
        assert_eq!(resolved, newer);

        // Order independent.
        let resolved = FeedItem::resolve(vec![newer.clone(), older]);
        assert_eq!(resolved, newer);
    }

    #[test]
    fn item_wire_format_is_stable() {
        let item = FeedItem {
            title: "t".into(),
            author: "a".into(),
            content: "c".into(),
            url: None,
            pub_date: zero_time(),
        };
        let json = serde_json::to_value(&item).unwrap();
        let object = json.as_object().unwrap();
        for field in ["title", "author", "content", "url", "publication_date"] {
            assert!(object.contains_key(field), "missing field {field}");
        }
    }
}
