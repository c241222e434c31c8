use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::models::CandidateItem;

use super::Fetcher;

const MAX_CONCURRENT_FETCHES: usize = 5;

pub struct RssFetcher {
    client: Client,
    sources: Vec<SourceConfig>,
    max_age: chrono::Duration,
}

impl RssFetcher {
    pub fn new(sources: Vec<SourceConfig>, max_age_hours: i64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("ai-news-alert/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            sources,
            max_age: chrono::Duration::hours(max_age_hours),
        })
    }

    pub async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<CandidateItem>> {
        let response = self.client.get(&source.feed_url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;
        let cutoff = Utc::now() - self.max_age;

        Ok(feed
            .entries
            .into_iter()
            .filter_map(|entry| candidate_from_entry(&source.name, entry, cutoff))
            .collect())
    }
}

fn candidate_from_entry(
    source_name: &str,
    entry: Entry,
    cutoff: DateTime<Utc>,
) -> Option<CandidateItem> {
    // Undated entries count as fresh
    let published_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
    if published_at < cutoff {
        return None;
    }

    let url = entry.links.first().map(|l| l.href.clone())?;

    // Try summary first, then fall back to content
    let body_html = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let body = html2text::from_read(body_html.as_bytes(), 100)
        .map(|text| text.trim().to_string())
        .unwrap_or(body_html);

    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    Some(CandidateItem::new(source_name, title, body, published_at, url))
}

/// Keeps the first item seen for each URL.
fn dedupe_by_url(items: Vec<CandidateItem>) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.url.clone()))
        .collect()
}

#[async_trait]
impl Fetcher for RssFetcher {
    /// Fetch all sources concurrently with rate limiting, preserving source order
    async fn fetch(&self) -> Result<Vec<CandidateItem>> {
        let per_source: Vec<Vec<CandidateItem>> = stream::iter(self.sources.iter().cloned())
            .map(|source| async move {
                match self.fetch_source(&source).await {
                    Ok(items) => {
                        tracing::info!(source = %source.name, count = items.len(), "fetched feed");
                        items
                    }
                    Err(e) => {
                        tracing::warn!(source = %source.name, error = %e, "failed to fetch feed");
                        Vec::new()
                    }
                }
            })
            .buffered(MAX_CONCURRENT_FETCHES)
            .collect()
            .await;

        let all: Vec<CandidateItem> = per_source.into_iter().flatten().collect();
        let total = all.len();
        let unique = dedupe_by_url(all);
        tracing::info!(total, unique = unique.len(), "collected candidate items");
        Ok(unique)
    }
}
