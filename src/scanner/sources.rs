use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::fetcher::ListingSource;
use crate::api::types::RawListing;
use crate::core::error::FetchError;

/// Deterministic in-process listing source keyed by search keyword.
///
/// Unknown keywords return an empty result. Used for dry runs and tests.
#[derive(Default)]
pub struct StaticListingSource {
    responses: RwLock<HashMap<String, Result<Vec<RawListing>, FetchError>>>,
    requests: AtomicUsize,
}

impl StaticListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_listings(&self, keyword: impl Into<String>, listings: Vec<RawListing>) {
        self.responses.write().await.insert(keyword.into(), Ok(listings));
    }

    pub async fn set_failure(&self, keyword: impl Into<String>, error: FetchError) {
        self.responses.write().await.insert(keyword.into(), Err(error));
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListingSource for StaticListingSource {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<RawListing>, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.responses.read().await.get(keyword) {
            Some(Ok(listings)) => Ok(listings.iter().take(limit).cloned().collect()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_replays_configured_results() {
        let source = StaticListingSource::new();
        source
            .set_listings(
                "설래담 연포탕",
                vec![
                    RawListing::new("A", "설래담 연포탕", "30000", "u1"),
                    RawListing::new("B", "설래담 연포탕", "31000", "u2"),
                ],
            )
            .await;
        source
            .set_failure("고래미 가니미소", FetchError::Status { status: 503 })
            .await;

        assert_eq!(source.search("설래담 연포탕", 1).await.unwrap().len(), 1);
        assert_eq!(
            source.search("고래미 가니미소", 10).await,
            Err(FetchError::Status { status: 503 })
        );
        assert!(source.search("unknown", 10).await.unwrap().is_empty());
        assert_eq!(source.requests(), 3);
    }
}
