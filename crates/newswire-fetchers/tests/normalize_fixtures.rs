//! Fixture-driven normalization tests: parse a captured provider payload and
//! check the canonical articles that come out.

use std::fs;
use std::path::{Path, PathBuf};

use newswire_fetchers::{guardian, newsapi, nytimes, total_pages_for};

fn fixture_path(source: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join(source)
        .join("sample.json")
}

fn read_fixture(source: &str) -> String {
    let path = fixture_path(source);
    fs::read_to_string(&path).unwrap_or_else(|_| panic!("reading {}", path.display()))
}

#[test]
fn nytimes_fixture_normalizes_to_canonical_articles() {
    let envelope: nytimes::Envelope = serde_json::from_str(&read_fixture("nytimes")).unwrap();
    let body = envelope.response.expect("response body");
    let docs = &body.docs;
    assert_eq!(docs.len(), 3);

    let hits = body.meta.unwrap().hits.unwrap();
    assert_eq!(hits, 25);
    assert_eq!(total_pages_for(hits, 10), 3);

    let articles: Vec<_> = docs
        .iter()
        .map(|doc| nytimes::normalize_article(doc, Some(1)))
        .collect();

    let first = &articles[0];
    assert_eq!(first.title, "Slow Cooker Red Lentil Pumpkin Soup");
    assert_eq!(first.slug, "slow-cooker-red-lentil-pumpkin-soup");
    assert_eq!(
        first.external_url,
        "https://www.nytimes.com/2025/11/07/dining/slow-cooker-red-lentil-pumpkin-soup.html"
    );
    assert_eq!(first.content, None);
    assert_eq!(first.source_id, Some(1));
    assert_eq!(
        first.published_at.unwrap().to_rfc3339(),
        "2025-11-07T14:00:06+00:00"
    );
    assert_eq!(first.tags.len(), 2);
    assert_eq!(first.tags[0].name, "Cooking and Cookbooks");
    assert_eq!(first.tags[0].slug, "cooking-and-cookbooks");
    assert_eq!(first.authors.len(), 1);
    assert_eq!(first.authors[0].firstname, "Sarah");
    assert_eq!(first.authors[0].lastname, "DiGregorio");
    assert_eq!(first.media.len(), 1);
    assert_eq!(
        first.media[0].url,
        "https://static01.nyt.com/images/2025/11/07/multimedia/soup-default.jpg"
    );
    assert_eq!(first.categories.len(), 1);
    assert_eq!(first.categories[0].name, "Recipe");

    // Joint byline splits into two authors, provider order preserved.
    let second = &articles[1];
    assert_eq!(second.authors.len(), 2);
    assert_eq!(second.authors[0].lastname, "Edmondson");
    assert_eq!(second.authors[1].lastname, "Walker");

    // The sparse briefing doc degrades instead of failing the batch.
    let third = &articles[2];
    assert_eq!(third.title, "Your Evening Briefing");
    assert!(third.tags.is_empty());
    assert!(third.authors.is_empty());
    assert!(third.media.is_empty());
    assert_eq!(third.categories.len(), 1);
    assert_eq!(third.categories[0].name, "Briefing");
}

#[test]
fn guardian_fixture_normalizes_to_canonical_articles() {
    let envelope: guardian::Envelope = serde_json::from_str(&read_fixture("guardian")).unwrap();
    let body = envelope.response.expect("response body");
    assert_eq!(body.pages, Some(5));
    assert_eq!(body.results.len(), 2);

    let articles: Vec<_> = body
        .results
        .iter()
        .map(|item| guardian::normalize_article(item, Some(2)))
        .collect();

    let first = &articles[0];
    assert_eq!(
        first.title,
        "Passengers start to feel bite of flight cuts amid US government shutdown"
    );
    assert_eq!(
        first.slug,
        "passengers-start-to-feel-bite-of-flight-cuts-amid-us-government-shutdown"
    );
    assert_eq!(
        first.description,
        "Airlines cancel hundreds of flights as air traffic controller shortages worsen."
    );
    assert!(first.content.as_deref().unwrap().contains("sixth week"));
    // Contributor tags feed authors, keyword tags feed tags.
    assert_eq!(first.tags.len(), 2);
    assert_eq!(first.tags[0].name, "Airline industry");
    assert_eq!(first.authors.len(), 1);
    assert_eq!(first.authors[0].firstname, "Gwyn");
    assert_eq!(
        first.authors[0].bio.as_deref(),
        Some("Gwyn Topham is the Guardian's transport correspondent")
    );
    assert_eq!(
        first.authors[0].profile_url.as_deref(),
        Some("https://uploads.guim.co.uk/2017/10/06/Gwyn-Topham.jpg")
    );
    // Structured image element wins over the thumbnail.
    assert_eq!(first.media.len(), 1);
    assert_eq!(first.media[0].url, "https://media.guim.co.uk/flight-cuts/2000.jpg");
    assert_eq!(first.media[0].alt, "Passengers queue at Newark airport");
    assert_eq!(first.categories[0].name, "Business");

    // No image elements: the thumbnail fallback applies.
    let second = &articles[1];
    assert_eq!(second.media.len(), 1);
    assert_eq!(second.media[0].url, "https://media.guim.co.uk/storm-season/500.jpg");
    assert_eq!(second.media[0].alt, "");
    assert!(second.authors.is_empty());
}

#[test]
fn newsapi_fixture_normalizes_to_canonical_articles() {
    let envelope: newsapi::Envelope = serde_json::from_str(&read_fixture("newsapi")).unwrap();
    assert_eq!(envelope.total_results, Some(25));
    assert_eq!(total_pages_for(envelope.total_results.unwrap(), 10), 3);

    let articles: Vec<_> = envelope
        .articles
        .iter()
        .map(|item| newsapi::normalize_article(item, Some(3)))
        .collect();
    assert_eq!(articles.len(), 3);

    let first = &articles[0];
    assert_eq!(first.title, "Chip makers race to secure rare earth supplies");
    assert_eq!(first.slug, "chip-makers-race-to-secure-rare-earth-supplies");
    assert_eq!(first.authors.len(), 1);
    assert_eq!(first.authors[0].firstname, "Zoe");
    assert_eq!(first.authors[0].lastname, "Kleinman");
    assert_eq!(first.media.len(), 1);
    assert_eq!(first.categories[0].name, "BBC News");
    assert!(first.tags.is_empty());
    assert!(first.content.as_deref().unwrap().starts_with("Semiconductor"));

    // An item with no author/media/outlet still yields a full record with
    // empty collections, never an error.
    let sparse = &articles[2];
    assert_eq!(sparse.title, "Markets briefing");
    assert!(sparse.authors.is_empty());
    assert!(sparse.media.is_empty());
    assert!(sparse.categories.is_empty());
    assert_eq!(sparse.description, "");
    assert!(sparse.published_at.is_none());
}

#[test]
fn normalization_is_idempotent() {
    let nyt: nytimes::Envelope = serde_json::from_str(&read_fixture("nytimes")).unwrap();
    let docs = nyt.response.unwrap().docs;
    let once: Vec<_> = docs
        .iter()
        .map(|d| nytimes::normalize_article(d, Some(1)))
        .collect();
    let twice: Vec<_> = docs
        .iter()
        .map(|d| nytimes::normalize_article(d, Some(1)))
        .collect();
    assert_eq!(once, twice);

    let guardian_env: guardian::Envelope =
        serde_json::from_str(&read_fixture("guardian")).unwrap();
    let results = guardian_env.response.unwrap().results;
    let once: Vec<_> = results
        .iter()
        .map(|i| guardian::normalize_article(i, Some(2)))
        .collect();
    let twice: Vec<_> = results
        .iter()
        .map(|i| guardian::normalize_article(i, Some(2)))
        .collect();
    assert_eq!(once, twice);
}
