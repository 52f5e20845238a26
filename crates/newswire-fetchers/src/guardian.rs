//! Guardian Content API fetcher.
//!
//! The Guardian multiplexes tags: `type == "keyword"` entries become article
//! tags, `type == "contributor"` entries become authors (with an HTML bio and
//! a byline image). Media prefers structured image elements over the
//! thumbnail field.

use std::sync::Arc;

use async_trait::async_trait;
use newswire_core::{
    parse_published_at, slugify, split_person_name, ArticleAuthor, ArticleCategory, ArticleMedia,
    ArticleTag, NormalizedArticle,
};
use newswire_storage::{FetchHistoryStore, HttpFetcher};
use serde::Deserialize;

use crate::resolver::FetchStateResolver;
use crate::{attempt_from_response, strip_html, FetchError, SourceFetcher};

pub const SOURCE: &str = "guardian";
const BASE_URL: &str = "https://content.guardianapis.com/search";

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub response: Option<Body>,
}

#[derive(Debug, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub results: Vec<Item>,
    pub pages: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub web_title: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub elements: Vec<Element>,
    pub fields: Option<Fields>,
    pub section_name: Option<String>,
    pub web_url: Option<String>,
    pub web_publication_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub web_title: Option<String>,
    pub bio: Option<String>,
    pub byline_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub file: Option<String>,
    pub type_data: Option<AssetTypeData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeData {
    pub alt_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fields {
    pub body: Option<String>,
    pub trail_text: Option<String>,
    pub thumbnail: Option<String>,
}

pub struct GuardianFetcher {
    http: Arc<HttpFetcher>,
    resolver: FetchStateResolver,
    history: Arc<dyn FetchHistoryStore>,
    api_key: Option<String>,
}

impl GuardianFetcher {
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
impl SourceFetcher for GuardianFetcher {
    fn source_name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_articles(&self) -> Result<Vec<NormalizedArticle>, FetchError> {
        let state = self.resolver.resolve(SOURCE).await?;
        if state.should_skip {
            return Ok(Vec::new());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!(source = SOURCE, "GUARDIAN_API_KEY is not set, skipping fetch");
            return Ok(Vec::new());
        };

        let page = state.next_page.to_string();
        let response = self
            .http
            .get(
                SOURCE,
                BASE_URL,
                &[
                    ("api-key", api_key),
                    ("page", &page),
                    ("show-fields", "body,trailText,thumbnail"),
                    ("show-elements", "image"),
                    ("show-tags", "contributor,keyword"),
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

        let body = envelope.as_ref().and_then(|e| e.response.as_ref());
        let results = body.map(|b| b.results.as_slice()).unwrap_or_default();
        // The Guardian reports its page count directly.
        let total_pages = body.and_then(|b| b.pages).unwrap_or(0) as i32;

        if let Some(source_id) = state.source_id {
            self.history
                .save(attempt_from_response(
                    source_id,
                    state.next_page,
                    results.len() as i32,
                    total_pages,
                    &response,
                ))
                .await?;
        }

        Ok(results
            .iter()
            .map(|item| normalize_article(item, state.source_id))
            .collect())
    }
}

pub fn normalize_article(item: &Item, source_id: Option<i64>) -> NormalizedArticle {
    let title = item.web_title.clone().unwrap_or_default();
    let fields = item.fields.as_ref();

    NormalizedArticle {
        slug: slugify(&title),
        title,
        external_url: item.web_url.clone().unwrap_or_default(),
        description: fields
            .and_then(|f| f.trail_text.clone())
            .unwrap_or_default(),
        content: fields.and_then(|f| f.body.clone()),
        published_at: item
            .web_publication_date
            .as_deref()
            .and_then(parse_published_at),
        source_id,
        tags: keyword_tags(&item.tags),
        authors: contributor_authors(&item.tags, source_id),
        media: media_from(&item.elements, fields),
        categories: item
            .section_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| vec![ArticleCategory::named(name)])
            .unwrap_or_default(),
    }
}

fn keyword_tags(tags: &[Tag]) -> Vec<ArticleTag> {
    tags.iter()
        .filter(|tag| tag.kind.as_deref() == Some("keyword"))
        .filter_map(|tag| tag.web_title.as_deref())
        .map(ArticleTag::named)
        .collect()
}

fn contributor_authors(tags: &[Tag], source_id: Option<i64>) -> Vec<ArticleAuthor> {
    tags.iter()
        .filter(|tag| tag.kind.as_deref() == Some("contributor"))
        .map(|tag| {
            let (firstname, lastname) =
                split_person_name(tag.web_title.as_deref().unwrap_or_default());
            ArticleAuthor {
                firstname,
                lastname,
                bio: tag.bio.as_deref().map(strip_html),
                profile_url: tag.byline_image_url.clone(),
                source_id,
            }
        })
        .collect()
}

/// First image element with a usable asset wins; the thumbnail field is the
/// fallback when no element carries one.
fn media_from(elements: &[Element], fields: Option<&Fields>) -> Vec<ArticleMedia> {
    for element in elements {
        if element.kind.as_deref() != Some("image") {
            continue;
        }
        for asset in &element.assets {
            if let Some(file) = &asset.file {
                return vec![ArticleMedia {
                    url: file.clone(),
                    alt: asset
                        .type_data
                        .as_ref()
                        .and_then(|t| t.alt_text.clone())
                        .unwrap_or_default(),
                }];
            }
        }
    }

    if let Some(thumbnail) = fields.and_then(|f| f.thumbnail.clone()) {
        return vec![ArticleMedia {
            url: thumbnail,
            alt: String::new(),
        }];
    }

    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: &str) -> Item {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn keyword_tags_exclude_contributor_tags() {
        let item = item(
            r#"{
                "webTitle": "Example",
                "tags": [
                    {"type": "keyword", "webTitle": "Air transport"},
                    {"type": "contributor", "webTitle": "Gwyn Topham"},
                    {"type": "keyword", "webTitle": "US news"}
                ]
            }"#,
        );
        let article = normalize_article(&item, Some(2));
        assert_eq!(
            article.tags,
            vec![ArticleTag::named("Air transport"), ArticleTag::named("US news")]
        );
        assert_eq!(article.authors.len(), 1);
        assert_eq!(article.authors[0].firstname, "Gwyn");
        assert_eq!(article.authors[0].lastname, "Topham");
    }

    #[test]
    fn contributor_bio_is_stripped_of_markup() {
        let item = item(
            r#"{
                "tags": [{
                    "type": "contributor",
                    "webTitle": "Gwyn Topham",
                    "bio": "<p>Transport correspondent</p>",
                    "bylineImageUrl": "https://example.org/gwyn.jpg"
                }]
            }"#,
        );
        let authors = contributor_authors(&item.tags, None);
        assert_eq!(authors[0].bio.as_deref(), Some("Transport correspondent"));
        assert_eq!(
            authors[0].profile_url.as_deref(),
            Some("https://example.org/gwyn.jpg")
        );
    }

    #[test]
    fn media_prefers_image_elements_over_thumbnail() {
        let item = item(
            r#"{
                "elements": [{
                    "type": "image",
                    "assets": [{"file": "https://media.example.org/full.jpg",
                                "typeData": {"altText": "Planes queueing"}}]
                }],
                "fields": {"thumbnail": "https://media.example.org/thumb.jpg"}
            }"#,
        );
        let media = media_from(&item.elements, item.fields.as_ref());
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url, "https://media.example.org/full.jpg");
        assert_eq!(media[0].alt, "Planes queueing");
    }

    #[test]
    fn media_falls_back_to_thumbnail() {
        let item = item(r#"{"fields": {"thumbnail": "https://media.example.org/thumb.jpg"}}"#);
        let media = media_from(&item.elements, item.fields.as_ref());
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url, "https://media.example.org/thumb.jpg");
        assert_eq!(media[0].alt, "");
    }

    #[test]
    fn missing_everything_degrades_to_empties() {
        let article = normalize_article(&item("{}"), None);
        assert_eq!(article.title, "");
        assert_eq!(article.description, "");
        assert_eq!(article.content, None);
        assert!(article.tags.is_empty());
        assert!(article.authors.is_empty());
        assert!(article.media.is_empty());
        assert!(article.categories.is_empty());
        assert!(article.published_at.is_none());
    }
}
