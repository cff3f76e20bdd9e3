//! Feed document fetching.
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use url::Url;

use crate::model::RawFeed;

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("feedmill/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client");

        FeedFetcher { client }
    }

    /// Downloads the feed document, stamping the fetch time the updater
    /// will record as `last_check`.
    pub async fn fetch(&self, url: &Url) -> Result<RawFeed> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("failed to fetch feed: HTTP {}", response.status());
        }

        let data = response.bytes().await?.to_vec();
        Ok(RawFeed {
            data,
            url: url.clone(),
            fetched_at: Utc::now(),
        })
    }
}
