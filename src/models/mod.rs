pub mod query;

pub use query::{LocationCriteria, PropertyType, Range, SearchQuery};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in `ListingRecord::raw_snippet`
pub const RAW_SNIPPET_LIMIT: usize = 500;

/// Where a listing was discovered
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    PrimarySite,
    FallbackSearch,
}

/// Location information for a listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// Location as displayed by the source
    pub text: String,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
}

impl Location {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            city: None,
            neighborhood: None,
        }
    }
}

/// Canonical listing record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub id: String,
    pub title: String,
    /// Price in whole currency units, currency marks stripped
    pub price: Option<i64>,
    pub rooms: Option<f32>,
    pub location: Location,
    /// Absolute link; empty when the block carried no usable link
    pub url: String,
    pub source: Source,
    pub fetched_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub raw_snippet: String,
}

impl ListingRecord {
    /// A record with neither url nor id cannot be surfaced to callers.
    pub fn is_usable(&self) -> bool {
        !self.url.is_empty() || !self.id.is_empty()
    }
}

/// Cut `raw` down to at most `RAW_SNIPPET_LIMIT` characters.
pub fn bounded_snippet(raw: &str) -> String {
    match raw.char_indices().nth(RAW_SNIPPET_LIMIT) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, url: &str) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: "3 rooms on Dizengoff".to_string(),
            price: None,
            rooms: Some(3.5),
            location: Location::from_text("Tel Aviv"),
            url: url.to_string(),
            source: Source::PrimarySite,
            fetched_at: Utc::now(),
            published_at: None,
            raw_snippet: String::new(),
        }
    }

    #[test]
    fn record_without_id_and_url_is_unusable() {
        assert!(!record("", "").is_usable());
        assert!(record("42", "").is_usable());
        assert!(record("", "https://www.yad2.co.il/item/42").is_usable());
    }

    #[test]
    fn snippet_is_bounded_on_char_boundaries() {
        let long = "ש".repeat(RAW_SNIPPET_LIMIT + 20);
        let snippet = bounded_snippet(&long);
        assert_eq!(snippet.chars().count(), RAW_SNIPPET_LIMIT);
        assert_eq!(bounded_snippet("short"), "short");
    }

    #[test]
    fn serialization_keeps_null_rooms_and_empty_url() {
        let mut rec = record("7", "");
        rec.rooms = None;
        let json = serde_json::to_string(&rec).unwrap();
        let back: ListingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
        assert!(json.contains("\"rooms\":null"));
        assert!(json.contains("\"source\":\"primary_site\""));
    }
}
