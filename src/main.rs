use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use feedmill::db::IdSource;
use feedmill::fetch::FeedFetcher;
use feedmill::store::{Client, MemoryBackend};
use feedmill::{config, master, pipeline};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let client = Client::new(Arc::new(MemoryBackend::new()));
    let ids = Arc::new(IdSource::new());

    for url in cfg.feed_urls()? {
        master::handle_add_request(&client, url).await?;
    }

    let fetcher = FeedFetcher::new(Duration::from_secs(cfg.app.fetch_timeout_secs));
    let pipeline = pipeline::spawn(
        client.clone(),
        ids,
        fetcher,
        chrono::Duration::seconds(cfg.app.refresh_interval_secs as i64),
    );

    info!(feeds = cfg.feeds.len(), "starting poll loop");
    let poll = master::run(
        client,
        pipeline,
        Duration::from_secs(cfg.app.poll_interval_secs),
    );

    tokio::select! {
        _ = poll => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
