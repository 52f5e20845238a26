//! Per-provider source fetchers behind one capability contract, plus the
//! fetch-state resolver and the registry that dispatches on source name.

pub mod guardian;
pub mod newsapi;
pub mod nytimes;
pub mod resolver;

use std::sync::Arc;

use async_trait::async_trait;
use newswire_core::{NewFetchAttempt, NormalizedArticle};
use newswire_storage::{FetchHistoryStore, FetchedResponse, HttpFetcher, SourceCatalog};
use scraper::Html;
use thiserror::Error;

use crate::resolver::FetchStateResolver;

pub const CRATE_NAME: &str = "newswire-fetchers";

/// Fallback backoff recorded for a 429 without a `Retry-After` header.
const RATE_LIMIT_FALLBACK_SECONDS: i64 = 3600;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure after retries; the call never reached a server, so
    /// no attempt is recorded and the next scheduled run simply tries again.
    #[error("connection failed after retries: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("unknown source type {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One implementation per external provider. Each variant owns its endpoint,
/// query shape, and normalization rules.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Resolve fetch state, call the provider (unless skipped), record the
    /// attempt, and normalize the payload preserving provider order.
    async fn fetch_articles(&self) -> Result<Vec<NormalizedArticle>, FetchError>;
}

/// Maps a source name to a fetcher; fails closed on unknown names.
pub trait SourceFetcherFactory: Send + Sync {
    fn create(&self, source_name: &str) -> Result<Box<dyn SourceFetcher>, FetchError>;
}

/// API keys handed to fetchers at construction. Never read from the
/// environment inside fetch logic.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub nytimes_api_key: Option<String>,
    pub guardian_api_key: Option<String>,
    pub newsapi_api_key: Option<String>,
}

/// Registry over the closed provider set.
pub struct ProviderRegistry {
    http: Arc<HttpFetcher>,
    catalog: Arc<dyn SourceCatalog>,
    history: Arc<dyn FetchHistoryStore>,
    credentials: ProviderCredentials,
}

impl ProviderRegistry {
    pub fn new(
        http: Arc<HttpFetcher>,
        catalog: Arc<dyn SourceCatalog>,
        history: Arc<dyn FetchHistoryStore>,
        credentials: ProviderCredentials,
    ) -> Self {
        Self {
            http,
            catalog,
            history,
            credentials,
        }
    }

    fn resolver(&self) -> FetchStateResolver {
        FetchStateResolver::new(self.catalog.clone(), self.history.clone())
    }
}

impl SourceFetcherFactory for ProviderRegistry {
    fn create(&self, source_name: &str) -> Result<Box<dyn SourceFetcher>, FetchError> {
        match source_name {
            "nytimes" => Ok(Box::new(nytimes::NyTimesFetcher::new(
                self.http.clone(),
                self.resolver(),
                self.history.clone(),
                self.credentials.nytimes_api_key.clone(),
            ))),
            "guardian" => Ok(Box::new(guardian::GuardianFetcher::new(
                self.http.clone(),
                self.resolver(),
                self.history.clone(),
                self.credentials.guardian_api_key.clone(),
            ))),
            "newsapi" => Ok(Box::new(newsapi::NewsApiFetcher::new(
                self.http.clone(),
                self.resolver(),
                self.history.clone(),
                self.credentials.newsapi_api_key.clone(),
            ))),
            other => Err(FetchError::UnknownSource(other.to_string())),
        }
    }
}

/// Summarize a completed HTTP exchange as the attempt record the *next*
/// cycle's resolver will read.
pub fn attempt_from_response(
    source_id: i64,
    page: i32,
    articles_count: i32,
    total_pages: i32,
    response: &FetchedResponse,
) -> NewFetchAttempt {
    let status = response.status.as_u16() as i32;
    let was_rate_limited = status == 429;
    let retry_after_seconds = if was_rate_limited {
        response
            .rate_limit()
            .retry_after
            .map(|secs| secs as i64)
            .unwrap_or(RATE_LIMIT_FALLBACK_SECONDS)
    } else {
        0
    };

    NewFetchAttempt {
        source_id,
        pages_fetched: page,
        articles_fetched: articles_count,
        total_pages_available: total_pages,
        http_status_code: status,
        error_message: (!response.is_success()).then(|| response.body.clone()),
        was_rate_limited,
        retry_after_seconds,
    }
}

/// Total pages implied by a result count, rounded up.
pub fn total_pages_for(hits: i64, page_size: i64) -> i32 {
    if hits <= 0 || page_size <= 0 {
        return 0;
    }
    ((hits + page_size - 1) / page_size) as i32
}

/// Flatten an HTML fragment to its text content (contributor bios arrive as
/// markup).
pub fn strip_html(fragment: &str) -> String {
    let document = Html::parse_fragment(fragment);
    document
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}
