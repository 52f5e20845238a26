//! NewsAPI.org `everything` fetcher.
//!
//! The flattest of the three payloads: a single author field, a single image
//! URL, no keyword data. The category is derived from the upstream outlet
//! name.

use std::sync::Arc;

use async_trait::async_trait;
use newswire_core::{
    parse_published_at, slugify, split_person_name, ArticleAuthor, ArticleCategory, ArticleMedia,
    NormalizedArticle,
};
use newswire_storage::{FetchHistoryStore, HttpFetcher};
use serde::Deserialize;

use crate::resolver::FetchStateResolver;
use crate::{attempt_from_response, total_pages_for, FetchError, SourceFetcher};

pub const SOURCE: &str = "newsapi";
const BASE_URL: &str = "https://newsapi.org/v2/everything";
const PAGE_SIZE: i64 = 10;
const QUERY: &str = "technology OR science OR business";
const DOMAINS: &str = "bbc.co.uk,bbc.com";
const EXCLUDE_DOMAINS: &str = "theguardian.com,nytimes.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub total_results: Option<i64>,
    #[serde(default)]
    pub articles: Vec<Item>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub source: Option<OutletRef>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutletRef {
    pub name: Option<String>,
}

pub struct NewsApiFetcher {
    http: Arc<HttpFetcher>,
    resolver: FetchStateResolver,
    history: Arc<dyn FetchHistoryStore>,
    api_key: Option<String>,
}

impl NewsApiFetcher {
    pub fn new(
        http: Arc<HttpFetcher>,
        resolver: FetchStateResolver,
        history: Arc<dyn FetchHistoryStore>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            resolver,
            history,
            api_key,
        }
    }
}

#[async_trait]
impl SourceFetcher for NewsApiFetcher {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_articles(&self) -> Result<Vec<NormalizedArticle>, FetchError> {
        let state = self.resolver.resolve(SOURCE).await?;
        if state.should_skip {
            return Ok(Vec::new());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(source = SOURCE, "NEWS_API_KEY is not set, skipping fetch");
            return Ok(Vec::new());
        };

        let page = state.next_page.to_string();
        let page_size = PAGE_SIZE.to_string();
        let response = self
            .http
            .get(
                SOURCE,
                BASE_URL,
                &[
                    ("apiKey", api_key),
                    ("q", QUERY),
                    ("excludeDomains", EXCLUDE_DOMAINS),
                    ("domains", DOMAINS),
                    ("language", "en"),
                    ("pageSize", &page_size),
                    ("page", &page),
                    ("sortBy", "publishedAt"),
                ],
            )
            .await?;

        let envelope = if response.is_success() {
            match serde_json::from_str::<Envelope>(&response.body) {
                Ok(env) => Some(env),
                Err(err) => {
                    tracing::warn!(source = SOURCE, error = %err, "unparseable response body");
                    None
                }
            }
        } else {
            tracing::warn!(source = SOURCE, status = %response.status, "non-success response");
            None
        };

        let items = envelope
            .as_ref()
            .map(|e| e.articles.as_slice())
            .unwrap_or_default();
        let total_pages = envelope
            .as_ref()
            .and_then(|e| e.total_results)
            .map(|total| total_pages_for(total, PAGE_SIZE))
            .unwrap_or(0);

        if let Some(source_id) = state.source_id {
            self.history
                .save(attempt_from_response(
                    source_id,
                    state.next_page,
                    items.len() as i32,
                    total_pages,
                    &response,
                ))
                .await?;
        }

        Ok(items
            .iter()
            .map(|item| normalize_article(item, state.source_id))
            .collect())
    }
}

pub fn normalize_article(item: &Item, source_id: Option<i64>) -> NormalizedArticle {
    let title = item.title.clone().unwrap_or_default();

    NormalizedArticle {
        slug: slugify(&title),
        title,
        external_url: item.url.clone().unwrap_or_default(),
        description: item.description.clone().unwrap_or_default(),
        content: item.content.clone(),
        published_at: item.published_at.as_deref().and_then(parse_published_at),
        source_id,
        tags: Vec::new(),
        authors: author_from(item.author.as_deref(), source_id),
        media: item
            .url_to_image
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| {
                vec![ArticleMedia {
                    url: url.to_string(),
                    alt: String::new(),
                }]
            })
            .unwrap_or_default(),
        categories: item
            .source
            .as_ref()
            .and_then(|s| s.name.as_deref())
            .filter(|name| !name.is_empty())
            .map(|name| vec![ArticleCategory::named(name)])
            .unwrap_or_default(),
    }
}

fn author_from(author: Option<&str>, source_id: Option<i64>) -> Vec<ArticleAuthor> {
    let Some(author) = author.map(str::trim).filter(|a| !a.is_empty()) else {
        return Vec::new();
    };
    let (firstname, lastname) = split_person_name(author);
    vec![ArticleAuthor {
        firstname,
        lastname,
        bio: None,
        profile_url: None,
        source_id,
    }]
}
