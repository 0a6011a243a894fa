pub mod tavily;

pub use tavily::TavilyIndex;

use crate::error::SearchError;
use crate::extract::fields::{
    clean_text, content_hash, find_price, find_rooms, id_from_url, known_city, parse_timestamp,
};
use crate::models::{bounded_snippet, ListingRecord, Location, SearchQuery, Source};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Most results the index returns for one request
pub const MAX_INDEX_RESULTS: usize = 20;

pub const DEFAULT_MIN_SCORE: f64 = 0.3;
pub const DEFAULT_TIMEZONE: &str = "Asia/Jerusalem";

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "apartment", "דירה", "rooms", "חדרים", "rent", "שכירות", "₪", "nis", "שח", "bedroom",
    "bathroom", "balcony", "מרפסת", "floor", "קומה", "m²", "מטר", "price", "מחיר",
];

pub const DEFAULT_INCLUDE_DOMAINS: &[&str] = &[
    "yad2.co.il",
    "madlan.co.il",
    "onmap.co.il",
    "facebook.com",
    "homeless.co.il",
    "ad-dor.com",
];

const INDEX_WEIGHT: f64 = 0.7;
const COVERAGE_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    #[default]
    Advanced,
}

/// One request to the search index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    pub query: String,
    pub search_depth: SearchDepth,
    pub max_results: usize,
    pub include_domains: Vec<String>,
}

/// One result as the index returns it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub published_date: Option<String>,
}

/// Web search backend used when the primary site yields nothing
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, request: &IndexRequest) -> Result<Vec<IndexHit>, SearchError>;

    fn name(&self) -> &str;
}

/// Listing found through the index, with its blended relevance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredListing {
    pub listing: ListingRecord,
    pub score: f64,
}

/// Filtering and ranking knobs for fallback search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub min_score: f64,
    /// A result must mention at least one of these to count as a listing
    pub keywords: Vec<String>,
    pub include_domains: Vec<String>,
    pub over_fetch: usize,
    pub search_depth: SearchDepth,
    /// IANA name of the zone that defines "today" for recency filtering
    pub timezone: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            include_domains: DEFAULT_INCLUDE_DOMAINS.iter().map(|d| d.to_string()).collect(),
            over_fetch: 3,
            search_depth: SearchDepth::Advanced,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl SearchSettings {
    pub fn tz(&self) -> Result<Tz, SearchError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| SearchError::InvalidTimezone(self.timezone.clone()))
    }
}

pub struct SearchFallbackEngine {
    index: Arc<dyn SearchIndex>,
    settings: SearchSettings,
    tz: Tz,
}

impl SearchFallbackEngine {
    pub fn new(index: Arc<dyn SearchIndex>, settings: SearchSettings) -> Result<Self, SearchError> {
        let tz = settings.tz()?;
        Ok(Self {
            index,
            settings,
            tz,
        })
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Query the index and return filtered, ranked listings
    pub async fn search(
        &self,
        query: &SearchQuery,
        location: &str,
        max_results: usize,
        recency_only: bool,
    ) -> Result<Vec<ScoredListing>, SearchError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        // Recency is decided locally so both modes see the same hits
        let request = IndexRequest {
            query: format!("{} {}", query.search_text(), location).trim().to_string(),
            search_depth: self.settings.search_depth,
            max_results: max_results
                .saturating_mul(self.settings.over_fetch.max(1))
                .min(MAX_INDEX_RESULTS),
            include_domains: self.settings.include_domains.clone(),
        };

        info!(index = self.index.name(), query = %request.query, "Running fallback search");
        let hits = self.index.search(&request).await?;
        let received = hits.len();

        let ranking = Ranking {
            terms: query_terms(&format!("{} {}", query.search_text(), location)),
            settings: &self.settings,
            tz: self.tz,
            now: Utc::now(),
            recency_only,
            max_results,
        };
        let ranked = ranking.rank(hits);

        info!(received, kept = ranked.len(), "Fallback search ranked");
        Ok(ranked)
    }
}

/// Lowercased query words worth matching against result text
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let word = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() >= 2 && !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Pure ranking of index hits; `now` and `tz` define the current day
pub struct Ranking<'a> {
    pub terms: Vec<String>,
    pub settings: &'a SearchSettings,
    pub tz: Tz,
    pub now: DateTime<Utc>,
    pub recency_only: bool,
    pub max_results: usize,
}

impl Ranking<'_> {
    pub fn rank(&self, hits: Vec<IndexHit>) -> Vec<ScoredListing> {
        let today = self.now.with_timezone(&self.tz).date_naive();
        let keywords: Vec<String> = self.settings.keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut scored: Vec<ScoredListing> = hits
            .into_iter()
            .filter(|hit| !hit.url.trim().is_empty())
            .filter_map(|hit| {
                let haystack = format!("{} {}", hit.title, hit.content).to_lowercase();

                let score = self.blend(hit.score, &haystack);
                if score < self.settings.min_score {
                    debug!(url = %hit.url, score, "Dropping low relevance result");
                    return None;
                }
                if !keywords.is_empty() && !keywords.iter().any(|k| haystack.contains(k.as_str())) {
                    debug!(url = %hit.url, "Dropping result without listing keywords");
                    return None;
                }

                let published = hit
                    .published_date
                    .as_deref()
                    .and_then(|raw| self.published_at(raw));
                if self.recency_only {
                    match published {
                        Some(ts) if ts.with_timezone(&self.tz).date_naive() == today => {}
                        _ => return None,
                    }
                }

                Some(ScoredListing {
                    listing: self.to_listing(hit, published),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.listing.published_at.cmp(&a.listing.published_at))
        });
        scored.truncate(self.max_results);
        scored
    }

    fn blend(&self, index_score: f64, haystack: &str) -> f64 {
        let coverage = if self.terms.is_empty() {
            0.0
        } else {
            let present = self.terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            present as f64 / self.terms.len() as f64
        };
        (INDEX_WEIGHT * index_score + COVERAGE_WEIGHT * coverage).clamp(0.0, 1.0)
    }

    /// Full timestamps, or a bare date taken as local midnight
    fn published_at(&self, raw: &str) -> Option<DateTime<Utc>> {
        parse_timestamp(raw).or_else(|| {
            let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()?;
            self.tz
                .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
        })
    }

    fn to_listing(&self, hit: IndexHit, published_at: Option<DateTime<Utc>>) -> ListingRecord {
        let text = format!("{} {}", hit.title, hit.content);
        let location = known_city(&text)
            .map(|city| Location {
                text: city.to_string(),
                city: Some(city.to_string()),
                neighborhood: None,
            })
            .unwrap_or_default();

        ListingRecord {
            id: id_from_url(&hit.url)
                .unwrap_or_else(|| format!("search-{}", &content_hash(&hit.url)[..8])),
            title: clean_text(&hit.title),
            price: find_price(&hit.content).or_else(|| find_price(&hit.title)),
            rooms: find_rooms(&hit.content).or_else(|| find_rooms(&hit.title)),
            location,
            url: hit.url,
            source: Source::FallbackSearch,
            fetched_at: self.now,
            published_at,
            raw_snippet: bounded_snippet(&hit.content),
        }
    }
}
