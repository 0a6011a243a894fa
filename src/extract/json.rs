use crate::extract::fields::{
    clean_text, id_from_url, parse_price, parse_rooms, parse_timestamp, resolve_url,
};
use crate::extract::{Extraction, ListingExtractor, ListingIter};
use crate::models::{bounded_snippet, ListingRecord, Location, Source};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Known places the listing array lives in API payloads, most specific first
const ITEM_PATHS: &[&[&str]] = &[
    &["data", "feed", "feed_items"],
    &["feed_items"],
    &["data", "listings"],
    &["listings"],
    &["items"],
    &["results"],
];

const ID_KEYS: &[&str] = &["id", "token", "link_token", "item_id"];
const TITLE_KEYS: &[&str] = &["title", "title_1", "address"];
const ROOM_KEYS: &[&str] = &["rooms", "Rooms", "Rooms_text"];
const URL_KEYS: &[&str] = &["url", "link", "href"];
const PUBLISHED_KEYS: &[&str] = &["date_added", "created_at", "published_at"];

/// Reads listings out of the site's JSON API responses
pub struct JsonExtractor {
    base_url: Url,
}

impl JsonExtractor {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

/// Find the listing array, returning it with the path it was found under
fn locate_items(value: &Value) -> Option<(String, Vec<Value>)> {
    for path in ITEM_PATHS {
        let found = path.iter().try_fold(value, |node, key| node.get(key));
        if let Some(Value::Array(items)) = found {
            return Some((path.join("."), items.clone()));
        }
    }
    match value {
        Value::Array(items) => Some(("$".to_string(), items.clone())),
        _ => None,
    }
}

impl ListingExtractor for JsonExtractor {
    type Input = Value;

    fn extract(&self, value: &Value, fetched_at: DateTime<Utc>) -> Extraction {
        let Some((path, items)) = locate_items(value) else {
            debug!("No known listing array in JSON payload");
            return Extraction::empty();
        };

        // Feeds interleave ads and banners with listings
        let items: Vec<Value> = items.into_iter().filter(Value::is_object).collect();
        debug!(path = %path, count = items.len(), "Located JSON listing items");

        let base = self.base_url.clone();
        Extraction {
            selector: Some(format!("json:{}", path)),
            blocks: items.len(),
            records: ListingIter::new(
                items
                    .into_iter()
                    .map(move |item| parse_item(&base, &item, fetched_at)),
            ),
        }
    }
}

/// String form of a scalar; numbers are accepted where text is expected
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(clean_text(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A plain string or a `{ "text": ... }` object
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("text").and_then(scalar),
        other => scalar(other),
    }
}

fn first_of(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| item.get(key).and_then(text_of))
}

fn place(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(text_of)
        .or_else(|| item.get("address").and_then(|a| a.get(key)).and_then(text_of))
}

fn parse_item(base: &Url, item: &Value, fetched_at: DateTime<Utc>) -> ListingRecord {
    let token = first_of(item, &["token", "link_token"]);

    let url = first_of(item, URL_KEYS)
        .map(|href| resolve_url(base, &href))
        .filter(|u| !u.is_empty())
        .or_else(|| {
            token
                .as_ref()
                .map(|t| resolve_url(base, &format!("/item/{}", t)))
        })
        .unwrap_or_default();

    let id = first_of(item, ID_KEYS)
        .or_else(|| id_from_url(&url))
        .unwrap_or_default();

    let price = match item.get("price") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => parse_price(s),
        _ => None,
    };

    let rooms = ROOM_KEYS.iter().find_map(|key| match item.get(key) {
        Some(Value::Number(n)) => n.as_f64().map(|f| f as f32),
        Some(Value::String(s)) => parse_rooms(s),
        _ => None,
    });

    let city = place(item, "city");
    let neighborhood = place(item, "neighborhood");
    let text = match (&neighborhood, &city) {
        (Some(n), Some(c)) => format!("{}, {}", n, c),
        (Some(only), None) | (None, Some(only)) => only.clone(),
        (None, None) => String::new(),
    };

    ListingRecord {
        id,
        title: first_of(item, TITLE_KEYS).unwrap_or_default(),
        price,
        rooms,
        location: Location {
            text,
            city,
            neighborhood,
        },
        url,
        source: Source::PrimarySite,
        fetched_at,
        published_at: first_of(item, PUBLISHED_KEYS).and_then(|t| parse_timestamp(&t)),
        raw_snippet: bounded_snippet(&item.to_string()),
    }
}
