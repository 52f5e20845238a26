//! Durable collaborators (source catalog, fetch history, article persistence)
//! and HTTP fetch utilities for Newswire.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newswire_core::{FetchAttempt, NewFetchAttempt, NormalizedArticle, Source};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::info_span;

pub const CRATE_NAME: &str = "newswire-storage";

/// Read access to the configured sources.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Source>>;
    async fn active_sources(&self) -> anyhow::Result<Vec<Source>>;
}

/// Append-only log of fetch attempts, queryable by "latest for source".
#[async_trait]
pub trait FetchHistoryStore: Send + Sync {
    async fn save(&self, attempt: NewFetchAttempt) -> anyhow::Result<FetchAttempt>;
    async fn latest_for_source(&self, source_id: i64) -> anyhow::Result<Option<FetchAttempt>>;
}

/// Persistence collaborator for normalized articles. Takes ownership of the
/// batch; implementations upsert nested entities by natural key.
#[async_trait]
pub trait ArticleSink: Send + Sync {
    async fn persist(&self, articles: &[NormalizedArticle]) -> anyhow::Result<usize>;
}

/// Catalog backed by an in-memory list (seeded from configuration).
#[derive(Debug, Clone, Default)]
pub struct StaticSourceCatalog {
    sources: Vec<Source>,
}

impl StaticSourceCatalog {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl SourceCatalog for StaticSourceCatalog {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Source>> {
        Ok(self
            .sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
        Ok(self.sources.iter().filter(|s| s.enabled).cloned().collect())
    }
}

/// Fetch history held in memory. Used by tests and offline runs; real cycles
/// go through [`PgFetchHistory`] so the skip circuit breaker survives
/// restarts.
#[derive(Debug, Default)]
pub struct InMemoryFetchHistory {
    rows: Mutex<Vec<FetchAttempt>>,
}

impl InMemoryFetchHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FetchHistoryStore for InMemoryFetchHistory {
    async fn save(&self, attempt: NewFetchAttempt) -> anyhow::Result<FetchAttempt> {
        let mut rows = self.rows.lock().await;
        let saved = FetchAttempt {
            id: rows.len() as i64 + 1,
            source_id: attempt.source_id,
            pages_fetched: attempt.pages_fetched,
            articles_fetched: attempt.articles_fetched,
            total_pages_available: attempt.total_pages_available,
            http_status_code: attempt.http_status_code,
            error_message: attempt.error_message,
            was_rate_limited: attempt.was_rate_limited,
            retry_after_seconds: attempt.retry_after_seconds,
            created_at: Utc::now(),
        };
        rows.push(saved.clone());
        Ok(saved)
    }

    async fn latest_for_source(&self, source_id: i64) -> anyhow::Result<Option<FetchAttempt>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.source_id == source_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }
}

/// Article sink that just collects the batch. Test support.
#[derive(Debug, Default)]
pub struct MemoryArticleSink {
    articles: Mutex<Vec<NormalizedArticle>>,
}

impl MemoryArticleSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stored(&self) -> Vec<NormalizedArticle> {
        self.articles.lock().await.clone()
    }
}

#[async_trait]
impl ArticleSink for MemoryArticleSink {
    async fn persist(&self, articles: &[NormalizedArticle]) -> anyhow::Result<usize> {
        let mut stored = self.articles.lock().await;
        stored.extend_from_slice(articles);
        Ok(articles.len())
    }
}

/// Catalog reading the `sources` table.
#[derive(Debug, Clone)]
pub struct PgSourceCatalog {
    pool: PgPool,
}

impl PgSourceCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn source_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        enabled: row.try_get("enabled")?,
    })
}

#[async_trait]
impl SourceCatalog for PgSourceCatalog {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Source>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, url, enabled
              FROM sources
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("querying source by name")?;

        row.as_ref().map(source_from_row).transpose()
    }

    async fn active_sources(&self) -> anyhow::Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, enabled
              FROM sources
             WHERE enabled
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("querying active sources")?;

        rows.iter().map(source_from_row).collect()
    }
}

/// Fetch history backed by the `fetches` table.
#[derive(Debug, Clone)]
pub struct PgFetchHistory {
    pool: PgPool,
}

impl PgFetchHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn attempt_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<FetchAttempt> {
    Ok(FetchAttempt {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        pages_fetched: row.try_get("pages_fetched")?,
        articles_fetched: row.try_get("articles_fetched")?,
        total_pages_available: row.try_get("total_pages_available")?,
        http_status_code: row.try_get("http_status_code")?,
        error_message: row.try_get("error_message")?,
        was_rate_limited: row.try_get("was_rate_limited")?,
        retry_after_seconds: row.try_get("retry_after_seconds")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl FetchHistoryStore for PgFetchHistory {
    async fn save(&self, attempt: NewFetchAttempt) -> anyhow::Result<FetchAttempt> {
        let row = sqlx::query(
            r#"
            INSERT INTO fetches
                (source_id, pages_fetched, articles_fetched, total_pages_available,
                 http_status_code, error_message, was_rate_limited, retry_after_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, source_id, pages_fetched, articles_fetched,
                      total_pages_available, http_status_code, error_message,
                      was_rate_limited, retry_after_seconds, created_at
            "#,
        )
        .bind(attempt.source_id)
        .bind(attempt.pages_fetched)
        .bind(attempt.articles_fetched)
        .bind(attempt.total_pages_available)
        .bind(attempt.http_status_code)
        .bind(&attempt.error_message)
        .bind(attempt.was_rate_limited)
        .bind(attempt.retry_after_seconds)
        .fetch_one(&self.pool)
        .await
        .context("inserting fetch attempt")?;

        attempt_from_row(&row)
    }

    async fn latest_for_source(&self, source_id: i64) -> anyhow::Result<Option<FetchAttempt>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_id, pages_fetched, articles_fetched,
                   total_pages_available, http_status_code, error_message,
                   was_rate_limited, retry_after_seconds, created_at
              FROM fetches
             WHERE source_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .context("querying latest fetch attempt")?;

        row.as_ref().map(attempt_from_row).transpose()
    }
}

/// Article sink writing to Postgres. Articles upsert by slug; nested tags and
/// categories upsert by slug, authors by (article, name), media by
/// (article, url), so re-running a cycle is idempotent.
#[derive(Debug, Clone)]
pub struct PgArticleSink {
    pool: PgPool,
}

impl PgArticleSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArticleSink for PgArticleSink {
    async fn persist(&self, articles: &[NormalizedArticle]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await.context("opening transaction")?;

        for article in articles {
            let row = sqlx::query(
                r#"
                INSERT INTO articles
                    (source_id, title, slug, external_url, description, content, published_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (slug) DO UPDATE
                    SET title = EXCLUDED.title,
                        external_url = EXCLUDED.external_url,
                        description = EXCLUDED.description,
                        content = EXCLUDED.content,
                        published_at = EXCLUDED.published_at
                RETURNING id
                "#,
            )
            .bind(article.source_id)
            .bind(&article.title)
            .bind(&article.slug)
            .bind(&article.external_url)
            .bind(&article.description)
            .bind(&article.content)
            .bind(article.published_at)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| format!("upserting article {}", article.slug))?;
            let article_id: i64 = row.try_get("id")?;

            for tag in &article.tags {
                let tag_row = sqlx::query(
                    r#"
                    INSERT INTO tags (name, slug)
                    VALUES ($1, $2)
                    ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
                    RETURNING id
                    "#,
                )
                .bind(&tag.name)
                .bind(&tag.slug)
                .fetch_one(&mut *tx)
                .await
                .context("upserting tag")?;
                let tag_id: i64 = tag_row.try_get("id")?;

                sqlx::query(
                    r#"
                    INSERT INTO article_tag (article_id, tag_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(article_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await
                .context("linking tag")?;
            }

            for category in &article.categories {
                let category_row = sqlx::query(
                    r#"
                    INSERT INTO categories (name, slug)
                    VALUES ($1, $2)
                    ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
                    RETURNING id
                    "#,
                )
                .bind(&category.name)
                .bind(&category.slug)
                .fetch_one(&mut *tx)
                .await
                .context("upserting category")?;
                let category_id: i64 = category_row.try_get("id")?;

                sqlx::query(
                    r#"
                    INSERT INTO article_category (article_id, category_id)
                    VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(article_id)
                .bind(category_id)
                .execute(&mut *tx)
                .await
                .context("linking category")?;
            }

            for author in &article.authors {
                sqlx::query(
                    r#"
                    INSERT INTO authors
                        (article_id, firstname, lastname, bio, profile_url, source_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (article_id, firstname, lastname) DO UPDATE
                        SET bio = EXCLUDED.bio,
                            profile_url = EXCLUDED.profile_url
                    "#,
                )
                .bind(article_id)
                .bind(&author.firstname)
                .bind(&author.lastname)
                .bind(&author.bio)
                .bind(&author.profile_url)
                .bind(author.source_id)
                .execute(&mut *tx)
                .await
                .context("upserting author")?;
            }

            for media in &article.media {
                sqlx::query(
                    r#"
                    INSERT INTO media (article_id, url, alt)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (article_id, url) DO NOTHING
                    "#,
                )
                .bind(article_id)
                .bind(&media.url)
                .bind(&media.alt)
                .execute(&mut *tx)
                .await
                .context("inserting media")?;
            }
        }

        tx.commit().await.context("committing article batch")?;
        Ok(articles.len())
    }
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running migrations")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Only server errors are retried. 4xx — including 429 — must surface so the
/// caller can record the attempt and let the next cycle's resolver react.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Fixed-delay retry: up to `max_retries` re-attempts after the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// A completed HTTP exchange. The status is returned for *any* outcome that
/// reached a server; only transport failures become errors.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn rate_limit(&self) -> RateLimitInfo {
        RateLimitInfo::from_headers(&self.headers)
    }
}

/// Best-effort rate-limit telemetry pulled from response headers. Providers
/// disagree on names; absent headers stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining_day: Option<i64>,
    pub limit_day: Option<i64>,
    pub remaining_minute: Option<i64>,
    pub limit_minute: Option<i64>,
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset: Option<i64>,
    pub retry_after: Option<u64>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining_day: header_i64(headers, "X-RateLimit-Remaining-Day"),
            limit_day: header_i64(headers, "X-RateLimit-Limit-Day"),
            remaining_minute: header_i64(headers, "X-RateLimit-Remaining-Minute"),
            limit_minute: header_i64(headers, "X-RateLimit-Limit-Minute"),
            remaining: header_i64(headers, "X-RateLimit-Remaining"),
            limit: header_i64(headers, "X-RateLimit-Limit"),
            reset: header_i64(headers, "X-RateLimit-Reset"),
            retry_after: headers
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
        }
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Thin reqwest wrapper shared by all source fetchers.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    /// Issue one GET, retrying transient failures (transport errors, 5xx)
    /// with a fixed delay. A non-success status is a normal return value.
    pub async fn get(
        &self,
        source_name: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<FetchedResponse, reqwest::Error> {
        let span = info_span!("http_fetch", source = source_name, url);
        let _guard = span.enter();

        let mut attempt = 0usize;
        loop {
            match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.retry.max_retries
                    {
                        attempt += 1;
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }
                    let headers = resp.headers().clone();
                    let body = resp.text().await?;
                    return Ok(FetchedResponse {
                        status,
                        headers,
                        body,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.retry.max_retries
                    {
                        attempt += 1;
                        tracing::debug!(error = ?err, attempt, "transient http error, retrying");
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn attempt(source_id: i64, page: i32) -> NewFetchAttempt {
        NewFetchAttempt {
            source_id,
            pages_fetched: page,
            articles_fetched: 10,
            total_pages_available: 0,
            http_status_code: 200,
            error_message: None,
            was_rate_limited: false,
            retry_after_seconds: 0,
        }
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        // 429 must reach the caller so it can be recorded, never retried.
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn rate_limit_headers_parse_best_effort() {
        let mut headers = HeaderMap::new();
        headers.insert("X-RateLimit-Remaining-Day", HeaderValue::from_static("499"));
        headers.insert("X-RateLimit-Limit-Day", HeaderValue::from_static("500"));
        headers.insert("X-RateLimit-Remaining-Minute", HeaderValue::from_static("59"));
        headers.insert("X-RateLimit-Limit-Minute", HeaderValue::from_static("60"));
        headers.insert("Retry-After", HeaderValue::from_static("120"));

        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.remaining_day, Some(499));
        assert_eq!(info.limit_day, Some(500));
        assert_eq!(info.remaining_minute, Some(59));
        assert_eq!(info.limit_minute, Some(60));
        assert_eq!(info.retry_after, Some(120));
        assert_eq!(info.remaining, None);
        assert_eq!(info.reset, None);
    }

    #[test]
    fn malformed_rate_limit_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("soon"));
        let info = RateLimitInfo::from_headers(&headers);
        assert_eq!(info.retry_after, None);
    }

    #[tokio::test]
    async fn in_memory_history_returns_newest_attempt() {
        let store = InMemoryFetchHistory::new();
        store.save(attempt(1, 1)).await.unwrap();
        store.save(attempt(1, 2)).await.unwrap();
        store.save(attempt(2, 7)).await.unwrap();

        let latest = store.latest_for_source(1).await.unwrap().unwrap();
        assert_eq!(latest.pages_fetched, 2);

        let other = store.latest_for_source(2).await.unwrap().unwrap();
        assert_eq!(other.pages_fetched, 7);

        assert!(store.latest_for_source(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn static_catalog_matches_names_case_insensitively() {
        let catalog = StaticSourceCatalog::new(vec![
            Source {
                id: 1,
                name: "nytimes".into(),
                url: "https://nytimes.com/".into(),
                enabled: true,
            },
            Source {
                id: 2,
                name: "guardian".into(),
                url: "https://theguardian.com/".into(),
                enabled: false,
            },
        ]);

        let found = catalog.find_by_name("NYTimes").await.unwrap().unwrap();
        assert_eq!(found.id, 1);
        assert!(catalog.find_by_name("reuters").await.unwrap().is_none());

        let active = catalog.active_sources().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "nytimes");
    }
}
