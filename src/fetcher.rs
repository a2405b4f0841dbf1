//! HTTP fetcher for threat feeds.
//!
//! One request per source per run, bounded by the source's timeout. There
//! are no retries: a failed source is reported and picked up again by the
//! next scheduled run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::config::FeedSource;
use crate::error::BlocksyncError;
use crate::prefix::{parse_feed, NetworkPrefix};
use crate::utils::format_count;

/// Maximum size per feed body (10 MB)
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024;

/// Maximum total size for all downloads of one run (50 MB)
const MAX_TOTAL_SIZE: usize = 50 * 1024 * 1024;

/// Maximum concurrent requests to feed servers
const MAX_CONCURRENT_FETCHES: usize = 4;

/// Retrieves the raw body of a feed.
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<String>;
}

/// reqwest-backed feed fetcher
pub struct Fetcher {
    client: Client,
    /// Cumulative download size (shared by concurrent fetches)
    total_downloaded: AtomicUsize,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("blocksync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            total_downloaded: AtomicUsize::new(0),
        })
    }

    /// Bytes downloaded so far
    pub fn total_downloaded(&self) -> usize {
        self.total_downloaded.load(Ordering::Relaxed)
    }

    fn network_error(source: &FeedSource, err: reqwest::Error) -> BlocksyncError {
        if err.is_timeout() {
            BlocksyncError::Network(format!(
                "{} timed out after {}s",
                source.name, source.timeout_secs
            ))
        } else {
            BlocksyncError::Network(format!("{}: {}", source.name, err))
        }
    }
}

// Default is intentionally not implemented: new() can fail.

#[async_trait]
impl FeedFetch for Fetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<String> {
        info!("Fetching {}...", source.name);

        let response = self
            .client
            .get(&source.url)
            .timeout(source.timeout())
            .send()
            .await
            .map_err(|e| Self::network_error(source, e))?;

        if !response.status().is_success() {
            return Err(BlocksyncError::Network(format!(
                "{}: HTTP {}",
                source.name,
                response.status()
            ))
            .into());
        }

        if let Some(content_length) = response.content_length() {
            let content_length = content_length as usize;
            if content_length > MAX_FEED_SIZE {
                anyhow::bail!(
                    "{}: response too large: {} bytes (max: {} bytes)",
                    source.name,
                    content_length,
                    MAX_FEED_SIZE
                );
            }
            let current_total = self.total_downloaded.load(Ordering::Relaxed);
            if current_total + content_length > MAX_TOTAL_SIZE {
                anyhow::bail!(
                    "{}: cumulative download limit exceeded: {} + {} > {} bytes",
                    source.name,
                    current_total,
                    content_length,
                    MAX_TOTAL_SIZE
                );
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::network_error(source, e))?;

        if body.len() > MAX_FEED_SIZE {
            anyhow::bail!(
                "{}: downloaded content too large: {} bytes (max: {} bytes)",
                source.name,
                body.len(),
                MAX_FEED_SIZE
            );
        }

        let new_total = self
            .total_downloaded
            .fetch_add(body.len(), Ordering::Relaxed)
            + body.len();
        if new_total > MAX_TOTAL_SIZE {
            anyhow::bail!(
                "{}: cumulative download limit exceeded: {} bytes (max: {} bytes)",
                source.name,
                new_total,
                MAX_TOTAL_SIZE
            );
        }

        debug!("Fetched {} ({} bytes)", source.name, body.len());
        Ok(body)
    }
}

/// Fetch every source concurrently; results keep the order of `sources`.
pub async fn fetch_all<'a, F>(
    fetcher: &F,
    sources: &[&'a FeedSource],
) -> Vec<(&'a FeedSource, Result<String>)>
where
    F: FeedFetch + ?Sized,
{
    stream::iter(sources.iter().copied())
        .map(|source| async move { (source, fetcher.fetch(source).await) })
        .buffered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await
}

/// Prefixes extracted from one feed body.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub prefixes: Vec<NetworkPrefix>,
    /// Data lines without a valid prefix
    pub rejected: usize,
    /// The result cap cut the feed short
    pub truncated: bool,
}

/// Parse a feed body with the source's comment markers and result cap.
pub fn parse_source(source: &FeedSource, body: &str) -> ParsedFeed {
    let mut iter = parse_feed(body, &source.comment_markers);
    let prefixes: Vec<NetworkPrefix> = match source.max_entries {
        Some(max) => iter.by_ref().take(max).collect(),
        None => iter.by_ref().collect(),
    };
    let truncated = source.max_entries == Some(prefixes.len()) && iter.next().is_some();

    info!(
        "Parsed {} - {} prefixes{}",
        source.name,
        format_count(prefixes.len()),
        if truncated { " (capped)" } else { "" }
    );
    if iter.rejected() > 0 {
        debug!("{}: {} malformed lines dropped", source.name, iter.rejected());
    }

    ParsedFeed {
        prefixes,
        rejected: iter.rejected(),
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned bodies; unknown sources fail.
    struct StubFetcher {
        bodies: HashMap<String, String>,
    }

    #[async_trait]
    impl FeedFetch for StubFetcher {
        async fn fetch(&self, source: &FeedSource) -> Result<String> {
            self.bodies
                .get(&source.name)
                .cloned()
                .ok_or_else(|| BlocksyncError::Network(format!("{}: HTTP 503", source.name)).into())
        }
    }

    fn source(name: &str) -> FeedSource {
        FeedSource::new(name, &format!("https://feeds.example.org/{}.txt", name))
    }

    #[test]
    fn test_parse_source_end_to_end() {
        let src = source("drop").with_comment_markers(";");
        let parsed = parse_source(&src, "; comment\n192.0.2.0/24\nnot-an-ip\n198.51.100.5\n");
        assert_eq!(parsed.prefixes.len(), 2);
        assert_eq!(parsed.rejected, 1);
        assert!(!parsed.truncated);
    }

    #[test]
    fn test_parse_source_cap() {
        let src = source("ipsum").with_max_entries(2);
        let parsed = parse_source(&src, "# header\n1.1.1.1\t9\n2.2.2.2\t8\n3.3.3.3\t7\n");
        assert_eq!(
            parsed
                .prefixes
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>(),
            vec!["1.1.1.1", "2.2.2.2"]
        );
        assert!(parsed.truncated);
    }

    #[test]
    fn test_parse_source_cap_not_reached() {
        let src = source("ipsum").with_max_entries(2);
        let parsed = parse_source(&src, "1.1.1.1\n2.2.2.2\n# trailer\n");
        assert_eq!(parsed.prefixes.len(), 2);
        assert!(!parsed.truncated);
    }

    #[test]
    fn test_parse_source_uses_source_markers() {
        // '#' is not a comment marker for this source
        let src = source("drop").with_comment_markers(";");
        let parsed = parse_source(&src, "; 9.9.9.9\n# 8.8.8.8\n");
        assert_eq!(parsed.prefixes.len(), 1);
        assert_eq!(parsed.prefixes[0].to_string(), "8.8.8.8");
    }

    #[tokio::test]
    async fn test_fetch_all_isolates_failures_and_keeps_order() {
        let fetcher = StubFetcher {
            bodies: HashMap::from([
                ("a".to_string(), "1.1.1.1\n".to_string()),
                ("c".to_string(), "3.3.3.3\n".to_string()),
            ]),
        };
        let (a, b, c) = (source("a"), source("b"), source("c"));
        let results = fetch_all(&fetcher, &[&a, &b, &c]).await;

        let names: Vec<&str> = results.iter().map(|(s, _)| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.as_ref().unwrap_err().to_string().contains("503"));
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let fetcher = StubFetcher {
            bodies: HashMap::new(),
        };
        assert!(fetch_all(&fetcher, &[]).await.is_empty());
    }

    #[test]
    fn test_fetcher_new() {
        let fetcher = Fetcher::new().unwrap();
        assert_eq!(fetcher.total_downloaded(), 0);
    }
}
