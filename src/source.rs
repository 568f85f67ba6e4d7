//! Client for the police-log message-thread feed.
//!
//! The feed is queried with a JSON body describing a custom time span and a
//! `skip`/`take` window. We page through it until the reported `count` is
//! reached, a short page comes back, or `source.max_pages` is hit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::models::{MessageThread, ThreadPage};
use crate::traits::ReportSource;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";
const ORIGIN: &str = "https://www.politiet.no";

/// Request body for a time-ranged query.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    sort_by_enum: &'static str,
    sort_by_asc: bool,
    time_span_type: &'static str,
    date_time_from: String,
    date_time_to: String,
    skip: usize,
    take: usize,
    category: Vec<String>,
}

pub struct PolitiloggenSource {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    max_pages: usize,
}

impl PolitiloggenSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
        })
    }

    async fn fetch_page(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        skip: usize,
    ) -> Result<ThreadPage> {
        let body = RangeQuery {
            sort_by_enum: "LastMessageOn",
            sort_by_asc: false,
            time_span_type: "Custom",
            date_time_from: from.to_rfc3339_opts(SecondsFormat::Millis, true),
            date_time_to: to.to_rfc3339_opts(SecondsFormat::Millis, true),
            skip,
            take: self.page_size,
            category: Vec::new(),
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("accept", "application/json")
            .header("origin", ORIGIN)
            .json(&body)
            .send()
            .await
            .context("Failed to fetch police data")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("source request failed: {} {}", status, text);
        }

        response
            .json::<ThreadPage>()
            .await
            .context("Failed to decode police data page")
    }
}

#[async_trait]
impl ReportSource for PolitiloggenSource {
    async fn threads_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MessageThread>> {
        let mut threads: Vec<MessageThread> = Vec::new();

        for page_index in 0..self.max_pages {
            let page = self
                .fetch_page(from, to, page_index * self.page_size)
                .await?;
            let returned = page.message_threads.len();
            threads.extend(page.message_threads);

            if returned < self.page_size || threads.len() as i64 >= page.count {
                break;
            }
            if page_index + 1 == self.max_pages {
                tracing::warn!(
                    fetched = threads.len(),
                    reported = page.count,
                    "source page limit reached before end of feed"
                );
            }
        }

        // Page boundaries can shift while we read; drop repeats.
        let mut seen = std::collections::HashSet::new();
        threads.retain(|t| seen.insert(t.id.clone()));

        Ok(threads)
    }

    async fn thread(&self, id: &str) -> Result<MessageThread> {
        let url = format!("{}/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("origin", ORIGIN)
            .send()
            .await
            .with_context(|| format!("Failed to fetch thread {}", id))?;

        let status = response.status();
        if !status.is_success() {
            bail!("source request failed: {} for thread {}", status, id);
        }

        response
            .json::<MessageThread>()
            .await
            .with_context(|| format!("Failed to decode thread {}", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_query_wire_format() {
        let q = RangeQuery {
            sort_by_enum: "LastMessageOn",
            sort_by_asc: false,
            time_span_type: "Custom",
            date_time_from: "2025-03-01T00:00:00.000Z".into(),
            date_time_to: "2025-03-01T06:00:00.000Z".into(),
            skip: 50,
            take: 50,
            category: vec![],
        };
        let v = serde_json::to_value(&q).unwrap();
        assert_eq!(v["sortByEnum"], "LastMessageOn");
        assert_eq!(v["sortByAsc"], false);
        assert_eq!(v["timeSpanType"], "Custom");
        assert_eq!(v["dateTimeFrom"], "2025-03-01T00:00:00.000Z");
        assert_eq!(v["skip"], 50);
        assert!(v["category"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let cfg = SourceConfig {
            base_url: "http://localhost:9/api/messagethread/".into(),
            ..SourceConfig::default()
        };
        let src = PolitiloggenSource::new(&cfg).unwrap();
        assert_eq!(src.base_url, "http://localhost:9/api/messagethread");
    }
}
