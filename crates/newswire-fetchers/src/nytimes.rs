//! NYTimes Article Search fetcher.
//!
//! Authors arrive as a single byline string ("By Jane Doe and John Smith"),
//! tags as a keyword list, media as one structured image asset.

use std::sync::Arc;

use async_trait::async_trait;
use newswire_core::{
    parse_published_at, slugify, split_person_name, ArticleAuthor, ArticleCategory, ArticleMedia,
    ArticleTag, NormalizedArticle,
};
use newswire_storage::{FetchHistoryStore, HttpFetcher};
use serde::Deserialize;

use crate::resolver::FetchStateResolver;
use crate::{attempt_from_response, total_pages_for, FetchError, SourceFetcher};

pub const SOURCE: &str = "nytimes";
const BASE_URL: &str = "https://api.nytimes.com/svc/search/v2/articlesearch.json";
const PAGE_SIZE: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub response: Option<Body>,
}

#[derive(Debug, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub docs: Vec<Doc>,
    pub meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    pub hits: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Doc {
    pub headline: Option<Headline>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    pub byline: Option<Byline>,
    pub multimedia: Option<Multimedia>,
    #[serde(rename = "abstract")]
    pub summary: Option<String>,
    pub web_url: Option<String>,
    pub pub_date: Option<String>,
    pub type_of_material: Option<String>,
    pub section_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Headline {
    pub main: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Keyword {
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Byline {
    pub original: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Multimedia {
    pub default: Option<MultimediaAsset>,
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MultimediaAsset {
    pub url: Option<String>,
}

pub struct NyTimesFetcher {
    http: Arc<HttpFetcher>,
    resolver: FetchStateResolver,
    history: Arc<dyn FetchHistoryStore>,
    api_key: Option<String>,
}

impl NyTimesFetcher {
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
impl SourceFetcher for NyTimesFetcher {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_articles(&self) -> Result<Vec<NormalizedArticle>, FetchError> {
        let state = self.resolver.resolve(SOURCE).await?;
        if state.should_skip {
            return Ok(Vec::new());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(source = SOURCE, "NYTIMES_API_KEY is not set, skipping fetch");
            return Ok(Vec::new());
        };

        let page = state.next_page.to_string();
        let response = self
            .http
            .get(SOURCE, BASE_URL, &[("api-key", api_key), ("page", &page)])
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

        let body = envelope.as_ref().and_then(|e| e.response.as_ref());
        let docs = body.map(|b| b.docs.as_slice()).unwrap_or_default();
        let total_pages = body
            .and_then(|b| b.meta.as_ref())
            .and_then(|m| m.hits)
            .map(|hits| total_pages_for(hits, PAGE_SIZE))
            .unwrap_or(0);

        if let Some(source_id) = state.source_id {
            self.history
                .save(attempt_from_response(
                    source_id,
                    state.next_page,
                    docs.len() as i32,
                    total_pages,
                    &response,
                ))
                .await?;
        }

        Ok(docs
            .iter()
            .map(|doc| normalize_article(doc, state.source_id))
            .collect())
    }
}

pub fn normalize_article(doc: &Doc, source_id: Option<i64>) -> NormalizedArticle {
    let title = doc
        .headline
        .as_ref()
        .and_then(|h| h.main.clone())
        .unwrap_or_default();

    NormalizedArticle {
        slug: slugify(&title),
        title,
        external_url: doc.web_url.clone().unwrap_or_default(),
        description: doc.summary.clone().unwrap_or_default(),
        content: None,
        published_at: doc.pub_date.as_deref().and_then(parse_published_at),
        source_id,
        tags: doc
            .keywords
            .iter()
            .filter_map(|k| k.value.as_deref())
            .map(ArticleTag::named)
            .collect(),
        authors: doc
            .byline
            .as_ref()
            .and_then(|b| b.original.as_deref())
            .map(|byline| byline_authors(byline, source_id))
            .unwrap_or_default(),
        media: media_from(doc.multimedia.as_ref()),
        categories: category_from(doc),
    }
}

/// Split a byline into authors: strip the leading "By", then split on commas
/// and the standalone word "and". Each name keeps its first two whitespace
/// tokens.
pub fn byline_authors(byline: &str, source_id: Option<i64>) -> Vec<ArticleAuthor> {
    let trimmed = byline.trim();
    let trimmed = trimmed
        .strip_prefix("By ")
        .or_else(|| trimmed.strip_prefix("by "))
        .unwrap_or(trimmed);

    trimmed
        .split(',')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            let (firstname, lastname) = split_person_name(name);
            ArticleAuthor {
                firstname,
                lastname,
                bio: None,
                profile_url: None,
                source_id,
            }
        })
        .collect()
}

fn media_from(multimedia: Option<&Multimedia>) -> Vec<ArticleMedia> {
    let Some(multimedia) = multimedia else {
        return Vec::new();
    };
    let Some(url) = multimedia.default.as_ref().and_then(|a| a.url.clone()) else {
        return Vec::new();
    };
    vec![ArticleMedia {
        url,
        alt: multimedia.caption.clone().unwrap_or_default(),
    }]
}

fn category_from(doc: &Doc) -> Vec<ArticleCategory> {
    doc.type_of_material
        .as_deref()
        .or(doc.section_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(|name| vec![ArticleCategory::named(name)])
        .unwrap_or_default()
}
