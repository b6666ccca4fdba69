use async_trait::async_trait;
use reqwest::Client;

use super::types::{RawListing, SearchResponse};
use crate::core::config::SourceConfig;
use crate::core::error::FetchError;
use crate::scanner::fetcher::ListingSource;

/// Shopping search API client. Results are requested cheapest first.
pub struct ShoppingSearchClient {
    client: Client,
    config: SourceConfig,
}

impl ShoppingSearchClient {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn with_client(client: Client, config: SourceConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ListingSource for ShoppingSearchClient {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<RawListing>, FetchError> {
        let display = limit.max(1).to_string();
        let mut request = self
            .client
            .get(&self.config.base_url)
            .query(&[("query", keyword), ("display", display.as_str()), ("sort", "asc")]);

        if let Some(id) = &self.config.client_id {
            request = request.header("X-Naver-Client-Id", id);
        }
        if let Some(secret) = &self.config.client_secret {
            request = request.header("X-Naver-Client-Secret", secret);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("Search API error for '{}': {} - {}", keyword, status, error_text);
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(parsed
            .items
            .into_iter()
            .take(limit)
            .map(RawListing::from)
            .collect())
    }
}
