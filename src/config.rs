//! Configuration loader and validator for the aggregation service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid feed url '{0}': {1}")]
    InvalidFeedUrl(String, url::ParseError),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub feeds: Vec<String>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Seconds between poll sweeps over the due-feed index.
    pub poll_interval_secs: u64,
    /// Seconds until a freshly fetched feed is due again.
    pub refresh_interval_secs: u64,
    /// Per-request fetch timeout.
    pub fetch_timeout_secs: u64,
}

impl Config {
    /// The configured feed list as parsed URLs.
    pub fn feed_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.feeds
            .iter()
            .map(|feed| {
                Url::parse(feed).map_err(|err| ConfigError::InvalidFeedUrl(feed.clone(), err))
            })
            .collect()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.refresh_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "app.refresh_interval_secs must be > 0",
        ));
    }
    if cfg.app.fetch_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.fetch_timeout_secs must be > 0"));
    }

    for feed in &cfg.feeds {
        let url =
            Url::parse(feed).map_err(|err| ConfigError::InvalidFeedUrl(feed.clone(), err))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Invalid("feed urls must be http or https"));
        }
    }

    Ok(())
}

/// Example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  poll_interval_secs: 300
  refresh_interval_secs: 3600
  fetch_timeout_secs: 30

feeds:
  - "https://example.com/rss"
  - "https://example.org/atom.xml"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.feed_urls().unwrap().len(), 2);
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.poll_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.refresh_interval_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn garbage_feed_url_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feeds.push("not a url".into());
        assert!(matches!(
            validate(&cfg),
            Err(ConfigError::InvalidFeedUrl(_, _))
        ));
    }

    #[test]
    fn non_http_feed_url_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.feeds.push("ftp://example.com/rss".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let path = td.path().join("config.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(example().as_bytes()).unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.app.poll_interval_secs, 300);
        assert_eq!(cfg.feeds.len(), 2);
    }
}
