//! Tolerant field parsers shared by the HTML and JSON extractors and the
//! search fallback.

use crate::models::query::KNOWN_CITIES;
use crate::models::Location;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{1,3}(?:[,.\s\x{a0}]\d{3})+|\d+(?:\.\d+)?").expect("number regex")
});

static CURRENCY_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:(\d[\d,.\s\x{a0}]*\d|\d)\s*(?:₪|ש"ח|שח|nis|ils)|(?:₪|nis|ils)\s*(\d[\d,.\s\x{a0}]*\d|\d))"#)
        .expect("currency regex")
});

static ROOMS_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)?)(?:\s*(½|1/2))?").expect("rooms regex")
});

static ROOMS_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?(?:\s*(?:½|1/2))?)\s*(?:חדרים|חדר|חד'|rooms?\b|bedrooms?\b)")
        .expect("rooms phrase regex")
});

static ITEM_PATH_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"item/([A-Za-z0-9]+)").expect("item id regex"));

static QUERY_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]id=(\d+)").expect("query id regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Collapse runs of whitespace and decode the entities scrapers leave behind
pub fn clean_text(text: &str) -> String {
    let decoded = text.replace("&nbsp;", " ").replace("&amp;", "&").replace('\u{a0}', " ");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

/// Parse a price, dropping currency marks and thousands separators
pub fn parse_price(text: &str) -> Option<i64> {
    let token = NUMBER.find(text)?.as_str();
    number_token(token)
}

/// Find an amount written next to a currency mark inside free text
pub fn find_price(text: &str) -> Option<i64> {
    let caps = CURRENCY_AMOUNT.captures(text)?;
    let amount = caps.get(1).or_else(|| caps.get(2))?.as_str();
    parse_price(amount)
}

fn number_token(token: &str) -> Option<i64> {
    let compact: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    match compact.split_once('.') {
        None => compact.parse().ok(),
        Some(_) if compact.split('.').skip(1).all(|group| group.len() == 3) => {
            compact.replace('.', "").parse().ok()
        }
        Some(_) => compact.parse::<f64>().ok().map(|v| v.trunc() as i64),
    }
}

/// Parse a room count: `3`, `3.5`, `3,5`, `3½` or `2 1/2`
pub fn parse_rooms(text: &str) -> Option<f32> {
    let caps = ROOMS_VALUE.captures(text)?;
    let whole: f32 = caps.get(1)?.as_str().replace(',', ".").parse().ok()?;
    let half = if caps.get(2).is_some() { 0.5 } else { 0.0 };
    Some(whole + half)
}

/// Find a room count written before a room word inside free text
pub fn find_rooms(text: &str) -> Option<f32> {
    let caps = ROOMS_PHRASE.captures(text)?;
    parse_rooms(caps.get(1)?.as_str())
}

/// Split "neighborhood, city" into the structured fields
pub fn parse_location(text: &str) -> Location {
    let text = clean_text(text);
    let parts: Vec<&str> = text.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();

    let (neighborhood, city) = match parts.as_slice() {
        [] => (None, None),
        [single] => (None, known_city(single).map(str::to_string)),
        [first, .., last] => (Some(first.to_string()), Some(last.to_string())),
    };

    Location {
        text,
        city,
        neighborhood,
    }
}

/// First known city name mentioned in `text`
pub fn known_city(text: &str) -> Option<&'static str> {
    KNOWN_CITIES.iter().copied().find(|city| text.contains(city))
}

/// Resolve `href` against `base`; unusable links become an empty string
pub fn resolve_url(base: &Url, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_lowercase().starts_with("javascript:") {
        return String::new();
    }
    base.join(href).map(|u| u.to_string()).unwrap_or_default()
}

/// Listing identifier embedded in a listing URL
pub fn id_from_url(url: &str) -> Option<String> {
    if let Some(caps) = ITEM_PATH_ID.captures(url) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = QUERY_ID.captures(url) {
        return Some(caps[1].to_string());
    }
    let path = Url::parse(url).ok()?.path().to_string();
    let last = path.trim_end_matches('/').rsplit('/').next()?.to_string();
    if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
        Some(last)
    } else {
        None
    }
}

/// Hex SHA-256 of `text`
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Timestamps in the forms listing payloads use
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_lose_currency_and_separators() {
        assert_eq!(parse_price("5,500 ₪"), Some(5500));
        assert_eq!(parse_price("₪ 12 000"), Some(12000));
        assert_eq!(parse_price("7.250 ש\"ח"), Some(7250));
        assert_eq!(parse_price("4800.00"), Some(4800));
        assert_eq!(parse_price("1,250.50 NIS"), Some(1250));
        assert_eq!(parse_price("לא צוין מחיר"), None);
    }

    #[test]
    fn currency_adjacent_amount_is_found_in_text() {
        assert_eq!(find_price("3 חדרים · 6,200 ₪ · קומה 2"), Some(6200));
        assert_eq!(find_price("Rent: NIS 4,900 per month"), Some(4900));
        assert_eq!(find_price("3 rooms, no price"), None);
    }

    #[test]
    fn rooms_accept_decimal_and_fractional_forms() {
        assert_eq!(parse_rooms("3"), Some(3.0));
        assert_eq!(parse_rooms("3.5 חדרים"), Some(3.5));
        assert_eq!(parse_rooms("3,5"), Some(3.5));
        assert_eq!(parse_rooms("3½"), Some(3.5));
        assert_eq!(parse_rooms("2 1/2 rooms"), Some(2.5));
        assert_eq!(parse_rooms("rooms"), None);
    }

    #[test]
    fn rooms_are_found_before_room_words() {
        assert_eq!(find_rooms("דירה 4 חדרים בפלורנטין"), Some(4.0));
        assert_eq!(find_rooms("Bright 2.5 rooms apartment, 5,000 ₪"), Some(2.5));
        assert_eq!(find_rooms("Floor 3, elevator"), None);
    }

    #[test]
    fn location_splits_neighborhood_and_city() {
        let loc = parse_location("פלורנטין,  תל אביב");
        assert_eq!(loc.neighborhood.as_deref(), Some("פלורנטין"));
        assert_eq!(loc.city.as_deref(), Some("תל אביב"));

        let single = parse_location("Haifa");
        assert_eq!(single.city.as_deref(), Some("Haifa"));
        assert_eq!(single.neighborhood, None);
    }

    #[test]
    fn relative_links_resolve_against_base() {
        let base = Url::parse("https://www.yad2.co.il").unwrap();
        assert_eq!(resolve_url(&base, "/item/abc123"), "https://www.yad2.co.il/item/abc123");
        assert_eq!(resolve_url(&base, "https://m.yad2.co.il/item/9"), "https://m.yad2.co.il/item/9");
        assert_eq!(resolve_url(&base, "javascript:void(0)"), "");
        assert_eq!(resolve_url(&base, ""), "");
    }

    #[test]
    fn ids_come_from_item_paths_and_numbers() {
        assert_eq!(id_from_url("https://www.yad2.co.il/item/xk29fa").as_deref(), Some("xk29fa"));
        assert_eq!(id_from_url("https://site.test/view?id=4411").as_deref(), Some("4411"));
        assert_eq!(id_from_url("https://site.test/listing/98765/").as_deref(), Some("98765"));
        assert_eq!(id_from_url("https://site.test/about"), None);
    }

    #[test]
    fn timestamps_in_common_forms() {
        assert!(parse_timestamp("2026-10-19T08:30:00Z").is_some());
        assert!(parse_timestamp("Mon, 19 Oct 2026 08:30:00 GMT").is_some());
        assert!(parse_timestamp("2026-10-19 08:30:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  3\n  rooms&nbsp;&amp; balcony "), "3 rooms & balcony");
    }

    #[test]
    fn content_hash_is_lowercase_sha256_hex() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash("").len(), 64);
    }
}
