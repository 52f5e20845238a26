//! Core domain model for Newswire: sources, fetch history, canonical articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "newswire-core";

/// Backoff applied when a source has no explicit retry hint: one hour.
pub const DEFAULT_BACKOFF_MS: u64 = 3_600_000;

/// An external article provider, identified by a stable lowercase name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Immutable record of one fetch cycle's outcome for a source.
///
/// Append-only; the resolver only ever reads the newest row per source.
/// `was_rate_limited` holds exactly when `http_status_code == 429`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub id: i64,
    pub source_id: i64,
    pub pages_fetched: i32,
    pub articles_fetched: i32,
    pub total_pages_available: i32,
    pub http_status_code: i32,
    pub error_message: Option<String>,
    pub was_rate_limited: bool,
    pub retry_after_seconds: i64,
    pub created_at: DateTime<Utc>,
}

/// A fetch attempt before it has been persisted (no id / created_at yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFetchAttempt {
    pub source_id: i64,
    pub pages_fetched: i32,
    pub articles_fetched: i32,
    pub total_pages_available: i32,
    pub http_status_code: i32,
    pub error_message: Option<String>,
    pub was_rate_limited: bool,
    pub retry_after_seconds: i64,
}

/// Resolved per-cycle decision for one source: which page to request next,
/// whether to skip this cycle, and the backoff the caller should honor.
///
/// Derived fresh from fetch history on every cycle; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    pub retry_after_millis: u64,
    pub next_page: i32,
    pub source_id: Option<i64>,
    pub should_skip: bool,
}

/// Provider-independent article representation consumed by all downstream
/// persistence. Produced transiently per fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub title: String,
    pub slug: String,
    pub external_url: String,
    pub description: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_id: Option<i64>,
    pub tags: Vec<ArticleTag>,
    pub authors: Vec<ArticleAuthor>,
    pub media: Vec<ArticleMedia>,
    pub categories: Vec<ArticleCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleTag {
    pub name: String,
    pub slug: String,
}

impl ArticleTag {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        Self { name, slug }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleAuthor {
    pub firstname: String,
    pub lastname: String,
    pub bio: Option<String>,
    pub profile_url: Option<String>,
    pub source_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMedia {
    pub url: String,
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleCategory {
    pub name: String,
    pub slug: String,
}

impl ArticleCategory {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        Self { name, slug }
    }
}

/// Lowercase, strip punctuation, hyphenate. Deterministic for a given input.
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Split a person name on whitespace into (firstname, lastname).
///
/// Keeps only the first two tokens; middle names and suffixes are dropped,
/// and a single-token name yields an empty lastname.
pub fn split_person_name(name: &str) -> (String, String) {
    let mut tokens = name.split_whitespace();
    let firstname = tokens.next().unwrap_or_default().to_string();
    let lastname = tokens.next().unwrap_or_default().to_string();
    (firstname, lastname)
}

/// Parse a provider timestamp. RFC 3339 first, then the NYTimes-style
/// `+0000` numeric offset. Anything else is `None` rather than an error so a
/// bad timestamp never fails the article.
pub fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
