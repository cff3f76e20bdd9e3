//! The fetch → parse → update pipeline.
//!
//! Each stage is one task reading from a bounded channel; a feed that
//! fails at any stage short-circuits to the outcome channel so one bad
//! feed never stalls the rest. A single updater task applies changes,
//! and the poller waits for every dispatched outcome before the next
//! sweep, so at most one update per feed URL is ever in flight.
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::mpsc;
use tracing::info;
use url::Url;

use crate::db::{update_feed, IdSource};
use crate::fetch::FeedFetcher;
use crate::model::{FeedOutcome, FeedParserOut, RawFeed, UpdatedModel};
use crate::parse::parse_feed;
use crate::store::Client;

const STAGE_BUFFER: usize = 16;

pub struct Pipeline {
    pub input: mpsc::Sender<Url>,
    pub output: mpsc::Receiver<FeedOutcome>,
}

/// Wires up the stage tasks and hands back the pipeline's endpoints.
/// The stages run until the input side is dropped.
pub fn spawn(
    client: Client,
    ids: Arc<IdSource>,
    fetcher: FeedFetcher,
    refresh_interval: Duration,
) -> Pipeline {
    let (input_tx, mut input_rx) = mpsc::channel::<Url>(STAGE_BUFFER);
    let (raw_tx, mut raw_rx) = mpsc::channel::<RawFeed>(STAGE_BUFFER);
    let (parsed_tx, mut parsed_rx) = mpsc::channel::<FeedParserOut>(STAGE_BUFFER);
    let (outcome_tx, outcome_rx) = mpsc::channel::<FeedOutcome>(STAGE_BUFFER);

    let fetch_outcomes = outcome_tx.clone();
    tokio::spawn(async move {
        while let Some(url) = input_rx.recv().await {
            match fetcher.fetch(&url).await {
                Ok(raw) => {
                    if raw_tx.send(raw).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = fetch_outcomes
                        .send(FeedOutcome {
                            url,
                            result: Err(err),
                        })
                        .await;
                }
            }
        }
    });

    let parse_outcomes = outcome_tx.clone();
    tokio::spawn(async move {
        while let Some(raw) = raw_rx.recv().await {
            let url = raw.url.clone();
            match parse_feed(&raw, refresh_interval) {
                Ok(data) => {
                    if parsed_tx.send(FeedParserOut { url, data }).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = parse_outcomes
                        .send(FeedOutcome {
                            url,
                            result: Err(err),
                        })
                        .await;
                }
            }
        }
    });

    let (completion_tx, mut completion_rx) = mpsc::channel::<UpdatedModel>(STAGE_BUFFER);
    let update_outcomes = outcome_tx.clone();
    tokio::spawn(async move {
        while let Some(next) = parsed_rx.recv().await {
            match update_feed(&client, &next.url, next.data, &ids).await {
                Ok(feed) => {
                    let update = UpdatedModel {
                        url: next.url,
                        feed,
                    };
                    if completion_tx.send(update).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = update_outcomes
                        .send(FeedOutcome {
                            url: next.url,
                            result: Err(err.into()),
                        })
                        .await;
                }
            }
        }
    });

    // Fold finished updates into plain outcomes.
    tokio::spawn(async move {
        while let Some(update) = completion_rx.recv().await {
            info!(
                url = %update.url,
                title = %update.feed.title,
                items = update.feed.item_keys.len(),
                "feed updated",
            );
            let outcome = FeedOutcome {
                url: update.url,
                result: Ok(()),
            };
            if outcome_tx.send(outcome).await.is_err() {
                break;
            }
        }
    });

    Pipeline {
        input: input_tx,
        output: outcome_rx,
    }
}
