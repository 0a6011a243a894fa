pub mod fields;
pub mod html;
pub mod json;

pub use html::HtmlExtractor;
pub use json::JsonExtractor;

use crate::error::ConfigError;
use crate::models::ListingRecord;
use crate::scrapers::Content;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Turns one kind of fetched content into listing records
pub trait ListingExtractor {
    type Input: ?Sized;

    fn extract(&self, input: &Self::Input, fetched_at: DateTime<Utc>) -> Extraction;
}

/// Records pulled from one piece of content, produced on demand
pub struct Extraction {
    /// Selector or JSON path that matched, `None` when nothing did
    pub selector: Option<String>,
    /// Number of listing blocks located before field parsing
    pub blocks: usize,
    pub records: ListingIter,
}

impl Extraction {
    pub fn empty() -> Self {
        Self {
            selector: None,
            blocks: 0,
            records: ListingIter::new(std::iter::empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }
}

/// Lazily parsed listing records
pub struct ListingIter(Box<dyn Iterator<Item = ListingRecord> + Send>);

impl ListingIter {
    pub fn new(iter: impl Iterator<Item = ListingRecord> + Send + 'static) -> Self {
        Self(Box::new(iter))
    }
}

impl Iterator for ListingIter {
    type Item = ListingRecord;

    fn next(&mut self) -> Option<ListingRecord> {
        self.0.next()
    }
}

/// Selector and heuristic settings for HTML extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Tried in order; the first selector with any match wins
    pub listing_selectors: Vec<String>,
    /// Class or attribute fragments that mark a listing container
    pub heuristic_tokens: Vec<String>,
    pub max_heuristic_blocks: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            listing_selectors: html::DEFAULT_LISTING_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            heuristic_tokens: html::DEFAULT_HEURISTIC_TOKENS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_heuristic_blocks: html::MAX_HEURISTIC_BLOCKS,
        }
    }
}

/// Dispatches fetched content to the matching extractor
pub struct Extractor {
    html: HtmlExtractor,
    json: JsonExtractor,
}

impl Extractor {
    pub fn new(html: HtmlExtractor, json: JsonExtractor) -> Self {
        Self { html, json }
    }

    pub fn from_config(config: &ExtractionConfig, base_url: &Url) -> Result<Self, ConfigError> {
        Ok(Self {
            html: HtmlExtractor::new(config, base_url.clone())?,
            json: JsonExtractor::new(base_url.clone()),
        })
    }

    pub fn extract(&self, content: &Content) -> Extraction {
        self.extract_at(content, Utc::now())
    }

    pub fn extract_at(&self, content: &Content, fetched_at: DateTime<Utc>) -> Extraction {
        match content {
            Content::Html(body) => self.html.extract(body.as_str(), fetched_at),
            Content::Json(value) => self.json.extract(value, fetched_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor() -> Extractor {
        let base = Url::parse("https://www.yad2.co.il").unwrap();
        Extractor::from_config(&ExtractionConfig::default(), &base).unwrap()
    }

    #[test]
    fn dispatches_on_content_kind() {
        let html = Content::Html(
            r#"<div class="feeditem"><a href="/item/a1">Nice flat in Florentin</a><span class="price">5,000 ₪</span></div>"#
                .to_string(),
        );
        let json = Content::Json(json!({"listings": [{"id": "j1", "title": "JSON flat", "price": 4200}]}));

        let from_html: Vec<_> = extractor().extract(&html).records.collect();
        let from_json: Vec<_> = extractor().extract(&json).records.collect();

        assert_eq!(from_html.len(), 1);
        assert_eq!(from_html[0].id, "a1");
        assert_eq!(from_json.len(), 1);
        assert_eq!(from_json[0].price, Some(4200));
    }

    #[test]
    fn empty_extraction_reports_no_selector() {
        let extraction = extractor().extract(&Content::Html("<p>nothing here</p>".to_string()));
        assert!(extraction.is_empty());
        assert!(extraction.selector.is_none());
        assert_eq!(extraction.records.count(), 0);
    }

    #[test]
    fn extraction_iterator_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let extraction = extractor().extract(&Content::Html(String::new()));
        assert_send(&extraction.records);
    }
}
