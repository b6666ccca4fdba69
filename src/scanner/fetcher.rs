use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::rate_limiter::RequestPacer;
use crate::api::types::{Product, RawListing};
use crate::core::error::FetchError;

pub const DEFAULT_MAX_LISTINGS: usize = 10;

/// Capability to fetch one page of search results for a query.
///
/// Implementations only talk to the remote side; pacing, timeouts, retries
/// and brand filtering are applied by [`ListingFetcher`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<RawListing>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub max_listings: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_retries: 1,
            max_listings: DEFAULT_MAX_LISTINGS,
        }
    }
}

pub struct ListingFetcher {
    source: Arc<dyn ListingSource>,
    pacer: RequestPacer,
    settings: FetchSettings,
    open_sessions: AtomicUsize,
}

impl ListingFetcher {
    pub fn new(source: Arc<dyn ListingSource>, settings: FetchSettings) -> Self {
        Self {
            pacer: RequestPacer::new(settings.min_delay, settings.max_delay),
            source,
            settings,
            open_sessions: AtomicUsize::new(0),
        }
    }

    /// Acquires the fetch session for one scan. The session is released when
    /// the returned guard is dropped.
    pub fn open_session(&self) -> FetchSession<'_> {
        let id = Uuid::new_v4();
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("🔓 Fetch session {} opened", id);
        FetchSession {
            fetcher: self,
            id,
            requests: 0,
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn pacer(&self) -> &RequestPacer {
        &self.pacer
    }

    async fn fetch_once(&self, keyword: &str) -> Result<Vec<RawListing>, FetchError> {
        self.pacer.wait().await;

        match tokio::time::timeout(
            self.settings.request_timeout,
            self.source.search(keyword, self.settings.max_listings),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.settings.request_timeout)),
        }
    }
}

pub struct FetchSession<'a> {
    fetcher: &'a ListingFetcher,
    id: Uuid,
    requests: usize,
}

impl FetchSession<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Fetches the first `max_listings` candidates for the product's keyword
    /// and keeps those whose title contains the brand.
    pub async fn fetch(&mut self, product: &Product) -> Result<Vec<RawListing>, FetchError> {
        let settings = &self.fetcher.settings;
        let mut attempt = 0;

        let listings = loop {
            self.requests += 1;
            match self.fetcher.fetch_once(&product.search_keyword).await {
                Ok(listings) => break listings,
                Err(e) if e.is_retryable() && attempt < settings.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "🔁 Fetch for '{}' failed ({}), retry {}/{}",
                        product.search_keyword,
                        e,
                        attempt,
                        settings.max_retries
                    );
                }
                Err(e) => return Err(e),
            }
        };

        let candidates = listings.len();
        let matching: Vec<RawListing> = listings
            .into_iter()
            .take(settings.max_listings)
            .filter(|listing| listing.title.contains(&product.brand))
            .collect();

        tracing::debug!(
            "📦 '{}': {} candidates, {} match brand '{}'",
            product.search_keyword,
            candidates,
            matching.len(),
            product.brand
        );

        Ok(matching)
    }
}

impl Drop for FetchSession<'_> {
    fn drop(&mut self) {
        self.fetcher.open_sessions.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            "🔒 Fetch session {} released after {} requests",
            self.id,
            self.requests
        );
    }
}
