//! Fetch-state resolution: what page to request next, and whether to request
//! anything at all.

use std::sync::Arc;

use newswire_core::{FetchAttempt, FetchState, DEFAULT_BACKOFF_MS};
use newswire_storage::{FetchHistoryStore, SourceCatalog};

/// The per-cycle decision, materialized as an explicit tagged state instead of
/// nested conditionals. Derived purely from the latest recorded attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CyclePlan {
    /// No history: start at page 1.
    Fresh,
    /// Prior cycle succeeded mid-feed: advance to the next page.
    Resuming {
        next_page: i32,
        retry_after_millis: u64,
    },
    /// Prior cycle hit 429: do not call out, retry the same page later.
    RateLimited {
        page: i32,
        retry_after_millis: u64,
    },
    /// Prior cycle exhausted the feed (404, empty page, or past the last
    /// page): pagination restarts from page 1.
    Exhausted,
}

fn backoff_millis(retry_after_seconds: i64) -> u64 {
    if retry_after_seconds <= 0 {
        DEFAULT_BACKOFF_MS
    } else {
        retry_after_seconds as u64 * 1000
    }
}

/// Derive the plan for the coming cycle from the newest attempt, if any.
///
/// A rate-limited attempt always records zero articles, so the rate-limit
/// check runs before the exhaustion check; otherwise every 429 would read as
/// "feed exhausted" and the skip circuit breaker would never engage.
pub fn plan_from_history(latest: Option<&FetchAttempt>) -> CyclePlan {
    let Some(attempt) = latest else {
        return CyclePlan::Fresh;
    };

    if attempt.was_rate_limited {
        return CyclePlan::RateLimited {
            page: attempt.pages_fetched,
            retry_after_millis: backoff_millis(attempt.retry_after_seconds),
        };
    }

    let finished_pagination = attempt.total_pages_available > 0
        && attempt.pages_fetched >= attempt.total_pages_available;
    if attempt.http_status_code == 404 || attempt.articles_fetched == 0 || finished_pagination {
        return CyclePlan::Exhausted;
    }

    CyclePlan::Resuming {
        next_page: attempt.pages_fetched + 1,
        retry_after_millis: backoff_millis(attempt.retry_after_seconds),
    }
}

/// Pure decision function over the source catalog and fetch history. Holds no
/// state of its own; durability comes entirely from the history store, so the
/// skip decision survives process restarts.
#[derive(Clone)]
pub struct FetchStateResolver {
    catalog: Arc<dyn SourceCatalog>,
    history: Arc<dyn FetchHistoryStore>,
}

impl FetchStateResolver {
    pub fn new(catalog: Arc<dyn SourceCatalog>, history: Arc<dyn FetchHistoryStore>) -> Self {
        Self { catalog, history }
    }

    pub async fn resolve(&self, source_name: &str) -> anyhow::Result<FetchState> {
        let Some(source) = self.catalog.find_by_name(source_name).await? else {
            // An unknown/unseeded source is treated as fresh.
            tracing::debug!(source = source_name, "source not found in catalog");
            return Ok(FetchState {
                retry_after_millis: DEFAULT_BACKOFF_MS,
                next_page: 1,
                source_id: None,
                should_skip: false,
            });
        };

        let latest = self.history.latest_for_source(source.id).await?;

        Ok(match plan_from_history(latest.as_ref()) {
            CyclePlan::Fresh | CyclePlan::Exhausted => FetchState {
                retry_after_millis: DEFAULT_BACKOFF_MS,
                next_page: 1,
                source_id: Some(source.id),
                should_skip: false,
            },
            CyclePlan::Resuming {
                next_page,
                retry_after_millis,
            } => FetchState {
                retry_after_millis,
                next_page,
                source_id: Some(source.id),
                should_skip: false,
            },
            CyclePlan::RateLimited {
                page,
                retry_after_millis,
            } => {
                tracing::warn!(source = source_name, "source is rate limited, skipping fetch");
                FetchState {
                    retry_after_millis,
                    next_page: page,
                    source_id: Some(source.id),
                    should_skip: true,
                }
            }
        })
    }
}
