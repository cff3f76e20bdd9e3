//! RSS/Atom decoding into normalized snapshots.
use chrono::Duration;
use feed_rs::parser;
use url::Url;

use crate::db::make_hash;
use crate::model::{zero_time, ParsedFeed, ParsedItem, RawFeed};

/// Decodes a fetched feed document. Entries come out newest first;
/// `next_check_time` is stamped `refresh_interval` past the fetch.
pub fn parse_feed(raw: &RawFeed, refresh_interval: Duration) -> anyhow::Result<ParsedFeed> {
    let feed = parser::parse(&raw.data[..])?;

    let mut items = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let author = entry
            .authors
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_default();
        // Full content when the feed carries it, otherwise the summary.
        let content = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();
        let link = entry.links.first().map(|l| l.href.clone());
        let url = link.as_deref().and_then(|href| Url::parse(href).ok());
        let pub_date = entry
            .published
            .or(entry.updated)
            .unwrap_or_else(zero_time);

        // The raw id hashes whatever first identifies the entry: GUID,
        // link, title, content, or publication date. An entry with none
        // of those is junk and gets skipped.
        let raw_id = if !entry.id.is_empty() {
            make_hash(&entry.id)
        } else if let Some(href) = &link {
            make_hash(href)
        } else if !title.is_empty() {
            make_hash(&title)
        } else if !content.is_empty() {
            make_hash(&content)
        } else if pub_date != zero_time() {
            make_hash(&pub_date.to_rfc3339())
        } else {
            continue;
        };

        items.push(ParsedItem {
            raw_id,
            title,
            author,
            content,
            url,
            pub_date,
        });
    }

    // Newest first. Stable, so date-less entries keep document order.
    items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        items,
        next_check_time: raw.fetched_at + refresh_interval,
        fetched_at: raw.fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example Site</title>
    <link>http://example.com/</link>
    <item>
      <title>Old Story</title>
      <link>http://example.com/old</link>
      <guid>old-guid</guid>
      <pubDate>Mon, 01 Jul 2013 00:00:00 GMT</pubDate>
      <description>old content</description>
    </item>
    <item>
      <title>New Story</title>
      <link>http://example.com/new</link>
      <guid>new-guid</guid>
      <pubDate>Mon, 01 Jul 2013 12:00:00 GMT</pubDate>
      <description>new content</description>
    </item>
    <item>
      <title>Undated Story</title>
      <link>http://example.com/undated</link>
    </item>
  </channel>
</rss>"#;

    fn raw(data: &str) -> RawFeed {
        RawFeed {
            data: data.as_bytes().to_vec(),
            url: Url::parse("http://example.com/rss").unwrap(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn items_come_out_newest_first() {
        let parsed = parse_feed(&raw(RSS_SAMPLE), Duration::hours(1)).unwrap();

        assert_eq!(parsed.title, "Example Site");
        let titles: Vec<&str> = parsed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["New Story", "Old Story", "Undated Story"]);
        assert_eq!(parsed.items[2].pub_date, zero_time());
    }

    #[test]
    fn raw_id_prefers_the_guid() {
        let parsed = parse_feed(&raw(RSS_SAMPLE), Duration::hours(1)).unwrap();
        assert_eq!(parsed.items[0].raw_id, make_hash("new-guid"));
    }

    #[test]
    fn next_check_is_one_refresh_interval_out() {
        let raw = raw(RSS_SAMPLE);
        let parsed = parse_feed(&raw, Duration::minutes(30)).unwrap();
        assert_eq!(
            parsed.next_check_time,
            raw.fetched_at + Duration::minutes(30)
        );
        assert_eq!(parsed.fetched_at, raw.fetched_at);
    }

    #[test]
    fn atom_entries_parse_too() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <id>urn:feed</id>
  <updated>2013-07-01T12:00:00Z</updated>
  <entry>
    <title>Entry One</title>
    <id>urn:entry-1</id>
    <link href="http://example.com/1"/>
    <updated>2013-07-01T12:00:00Z</updated>
    <author><name>Someone</name></author>
    <content type="text">body text</content>
  </entry>
</feed>"#;

        let parsed = parse_feed(&raw(atom), Duration::hours(1)).unwrap();
        assert_eq!(parsed.title, "Atom Example");
        assert_eq!(parsed.items.len(), 1);

        let item = &parsed.items[0];
        assert_eq!(item.author, "Someone");
        assert_eq!(item.content, "body text");
        assert_eq!(item.raw_id, make_hash("urn:entry-1"));
        assert_eq!(
            item.url,
            Some(Url::parse("http://example.com/1").unwrap())
        );
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(parse_feed(&raw("definitely not xml"), Duration::hours(1)).is_err());
    }
}
