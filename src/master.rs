//! Feed registration and the poll loop driving the pipeline.
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};
use url::Url;

use crate::db::{url_key, Feed, NEXT_CHECK_INDEX};
use crate::model::ZERO_TIME_UNIX;
use crate::pipeline::Pipeline;
use crate::store::{Client, Stored, StoreError, FEEDS_BUCKET};

/// Registers a feed. A fresh feed gets an empty record whose zero-time
/// `next_check` makes the very next poll sweep pick it up; registering
/// an already-known URL is a no-op.
pub async fn handle_add_request(client: &Client, url: Url) -> Result<(), StoreError> {
    match client.load::<Feed>(&url_key(&url)).await {
        Ok(_) => Ok(()),
        Err(StoreError::NotFound) => {
            let mut stored = Stored::new(url_key(&url), Feed::new(url));
            client.save(&mut stored).await
        }
        Err(err) => Err(err),
    }
}

/// One poll sweep: find every feed due for a check, push its URL into
/// the pipeline, and wait for one outcome per dispatched feed. Failures
/// are logged per feed; the sweep itself always completes.
pub async fn poll_due_feeds(client: &Client, pipeline: &mut Pipeline) {
    let now = Utc::now().timestamp().to_string();
    let due = match client
        .index_query_range(
            FEEDS_BUCKET,
            NEXT_CHECK_INDEX,
            &ZERO_TIME_UNIX.to_string(),
            &now,
        )
        .await
    {
        Ok(keys) => keys,
        Err(err) => {
            error!(?err, "failed to query feeds due for polling");
            return;
        }
    };

    let mut dispatched = 0usize;
    for key in due {
        match client.load::<Feed>(&key).await {
            Ok(stored) => {
                dispatched += 1;
                let input = pipeline.input.clone();
                let url = stored.record.url.clone();
                // Detached send so a full pipeline can't stall the
                // dispatch of the remaining feeds.
                tokio::spawn(async move {
                    let _ = input.send(url).await;
                });
            }
            Err(err) => {
                warn!(key = %key, ?err, "failed to load feed due for polling");
            }
        }
    }

    for _ in 0..dispatched {
        match pipeline.output.recv().await {
            Some(outcome) => match outcome.result {
                Ok(()) => debug!(url = %outcome.url, "feed update complete"),
                Err(err) => warn!(url = %outcome.url, ?err, "feed update failed"),
            },
            None => break,
        }
    }
}

/// Polls forever on a fixed tick, starting with an immediate sweep.
pub async fn run(client: Client, mut pipeline: Pipeline, poll_interval: Duration) {
    let mut tick = tokio::time::interval(poll_interval);
    loop {
        tick.tick().await;
        poll_due_feeds(&client, &mut pipeline).await;
    }
}
