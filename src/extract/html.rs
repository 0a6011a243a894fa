use crate::error::ConfigError;
use crate::extract::fields::{
    clean_text, content_hash, find_price, find_rooms, id_from_url, known_city, parse_location,
    parse_price, parse_rooms, resolve_url,
};
use crate::extract::{Extraction, ExtractionConfig, ListingExtractor, ListingIter};
use crate::models::{bounded_snippet, ListingRecord, Location, Source};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use url::Url;

pub const DEFAULT_LISTING_SELECTORS: &[&str] = &[
    r#"div[data-testid="feed-item"]"#,
    r#"div[data-testid="listing-item"]"#,
    ".feeditem",
    ".feed_item",
    "[data-item-id]",
    ".feed-list-item",
    ".result-item",
    ".item-wrapper",
    ".listing-item",
    ".property-item",
];

pub const DEFAULT_HEURISTIC_TOKENS: &[&str] =
    &["feed", "item", "listing", "property", "card", "result"];

pub const MAX_HEURISTIC_BLOCKS: usize = 20;

/// Label reported when the heuristic scan produced the blocks
pub const HEURISTIC_LABEL: &str = "heuristic";

const ID_ATTRS: &[&str] = &["data-item-id", "data-listing-id", "data-id", "data-testid"];

const ROOM_WORDS: &[&str] = &["חדר", "חד'", "room"];

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
}

static HEURISTIC_SCAN: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div, li, article, section").expect("scan selector"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("link selector"));
static ITEM_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"a[href*="item"], a[href*="listing"]"#).expect("item link selector")
});
static DIV: Lazy<Selector> = Lazy::new(|| Selector::parse("div").expect("div selector"));
static ID_CARRIER: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-item-id], [data-listing-id], [data-id], [data-testid]")
        .expect("id selector")
});

static TITLE: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[
        r#"[data-testid="title"]"#,
        ".title",
        ".item-title",
        ".listing-title",
        "h1",
        "h2",
        "h3",
        "h4",
        ".heading",
        ".property-title",
    ])
});
static PRICE: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[r#"[data-testid="price"]"#, ".price", ".item-price", ".listing-price"])
});
static ROOMS: Lazy<Vec<Selector>> =
    Lazy::new(|| selectors(&[r#"[data-testid="rooms"]"#, ".rooms", ".item-rooms"]));
static LOCATION: Lazy<Vec<Selector>> = Lazy::new(|| {
    selectors(&[r#"[data-testid="location"]"#, ".location", ".item-location", ".address"])
});

/// Pulls listing blocks out of a search results page
pub struct HtmlExtractor {
    selectors: Vec<(String, Selector)>,
    tokens: Vec<String>,
    max_heuristic_blocks: usize,
    base_url: Url,
}

impl HtmlExtractor {
    pub fn new(config: &ExtractionConfig, base_url: Url) -> Result<Self, ConfigError> {
        let selectors = config
            .listing_selectors
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                Selector::parse(raw)
                    .map(|sel| (raw.clone(), sel))
                    .map_err(|e| {
                        ConfigError::invalid(format!("extraction.listing_selectors[{}]", i), e)
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            selectors,
            tokens: config.heuristic_tokens.iter().map(|t| t.to_lowercase()).collect(),
            max_heuristic_blocks: config.max_heuristic_blocks,
            base_url,
        })
    }

    /// Outer HTML of every listing block, plus the label of what matched
    fn locate_blocks(&self, document: &Html) -> (Option<String>, Vec<String>) {
        for (label, selector) in &self.selectors {
            let blocks: Vec<String> = document.select(selector).map(|el| el.html()).collect();
            if !blocks.is_empty() {
                debug!(selector = %label, count = blocks.len(), "Listing selector matched");
                return (Some(label.clone()), blocks);
            }
        }

        let blocks = self.heuristic_blocks(document);
        if blocks.is_empty() {
            (None, blocks)
        } else {
            debug!(count = blocks.len(), "Heuristic scan found listing blocks");
            (Some(HEURISTIC_LABEL.to_string()), blocks)
        }
    }

    fn heuristic_blocks(&self, document: &Html) -> Vec<String> {
        let candidates: Vec<ElementRef> = document
            .select(&HEURISTIC_SCAN)
            .filter(|el| self.carries_token(el) && has_listing_evidence(el))
            .collect();
        let candidate_ids: HashSet<_> = candidates.iter().map(|el| el.id()).collect();

        // Group each candidate under its nearest candidate ancestor
        let mut children: HashMap<_, Vec<(String, String)>> = HashMap::new();
        for element in &candidates {
            if let Some(parent) = element.ancestors().find(|n| candidate_ids.contains(&n.id())) {
                children.entry(parent.id()).or_default().push(signature(element));
            }
        }

        // A candidate holding repeated look-alike candidates is a list, not a listing
        let lists: HashSet<_> = children
            .into_iter()
            .filter(|(_, sigs)| {
                sigs.iter()
                    .enumerate()
                    .any(|(i, sig)| sigs[i + 1..].contains(sig))
            })
            .map(|(id, _)| id)
            .collect();

        let mut taken = HashSet::new();
        let mut blocks = Vec::new();

        // Document order visits containers before their children
        for element in candidates {
            if blocks.len() >= self.max_heuristic_blocks {
                break;
            }
            if lists.contains(&element.id())
                || element.ancestors().any(|node| taken.contains(&node.id()))
            {
                continue;
            }
            taken.insert(element.id());
            blocks.push(element.html());
        }

        blocks
    }

    fn carries_token(&self, element: &ElementRef) -> bool {
        element.value().attrs().any(|(_, value)| {
            let value = value.to_lowercase();
            self.tokens.iter().any(|token| value.contains(token.as_str()))
        })
    }
}

fn signature(element: &ElementRef) -> (String, String) {
    let value = element.value();
    (value.name().to_string(), value.attr("class").unwrap_or_default().to_string())
}

fn has_listing_evidence(element: &ElementRef) -> bool {
    let text = element.text().collect::<String>().to_lowercase();
    if text.contains('₪') || text.contains("ש\"ח") {
        return true;
    }
    if ROOM_WORDS.iter().any(|word| text.contains(word)) {
        return true;
    }
    element.select(&ITEM_LINK).next().is_some() || element.select(&DIV).count() > 3
}

impl ListingExtractor for HtmlExtractor {
    type Input = str;

    fn extract(&self, html: &str, fetched_at: DateTime<Utc>) -> Extraction {
        let document = Html::parse_document(html);
        let (selector, blocks) = self.locate_blocks(&document);
        let count = blocks.len();
        let base = self.base_url.clone();

        Extraction {
            selector,
            blocks: count,
            records: ListingIter::new(
                blocks
                    .into_iter()
                    .map(move |block| parse_block(&base, &block, fetched_at)),
            ),
        }
    }
}

/// Parse one listing block; each field falls back independently
fn parse_block(base: &Url, block_html: &str, fetched_at: DateTime<Utc>) -> ListingRecord {
    let fragment = Html::parse_fragment(block_html);
    let root = fragment.root_element();
    let block = root.children().filter_map(ElementRef::wrap).next().unwrap_or(root);
    let text = clean_text(&block.text().collect::<Vec<_>>().join(" "));

    let url = block_url(base, &block);
    let id = block_id(&block)
        .or_else(|| id_from_url(&url))
        .unwrap_or_else(|| format!("hash-{}", &content_hash(block_html)[..8]));

    let title = first_text(&block, &TITLE, 5).unwrap_or_else(|| longest_text(&block));

    let price = first_text(&block, &PRICE, 0)
        .and_then(|t| parse_price(&t))
        .or_else(|| find_price(&text));

    let rooms = first_text(&block, &ROOMS, 0)
        .and_then(|t| parse_rooms(&t))
        .or_else(|| find_rooms(&text));

    let location = first_text(&block, &LOCATION, 0)
        .map(|t| parse_location(&t))
        .or_else(|| {
            known_city(&text).map(|city| Location {
                text: city.to_string(),
                city: Some(city.to_string()),
                neighborhood: None,
            })
        })
        .unwrap_or_default();

    ListingRecord {
        id,
        title,
        price,
        rooms,
        location,
        url,
        source: Source::PrimarySite,
        fetched_at,
        published_at: None,
        raw_snippet: bounded_snippet(block_html),
    }
}

/// Text of the first element matching any selector, longer than `min_chars`
fn first_text(block: &ElementRef, selectors: &[Selector], min_chars: usize) -> Option<String> {
    selectors.iter().find_map(|selector| {
        block
            .select(selector)
            .map(|el| clean_text(&el.text().collect::<Vec<_>>().join(" ")))
            .find(|text| !text.is_empty() && text.chars().count() > min_chars)
    })
}

fn longest_text(block: &ElementRef) -> String {
    block
        .text()
        .map(clean_text)
        .max_by_key(|t| t.chars().count())
        .map(|t| t.chars().take(100).collect())
        .unwrap_or_default()
}

fn block_url(base: &Url, block: &ElementRef) -> String {
    let href = if block.value().name() == "a" {
        block.value().attr("href")
    } else {
        block.select(&LINK).next().and_then(|a| a.value().attr("href"))
    };
    href.map(|h| resolve_url(base, h)).unwrap_or_default()
}

fn block_id(block: &ElementRef) -> Option<String> {
    std::iter::once(*block)
        .chain(block.select(&ID_CARRIER))
        .find_map(|el| {
            ID_ATTRS.iter().find_map(|attr| {
                let value = el.value().attr(attr)?.trim();
                let valid = if *attr == "data-testid" {
                    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
                } else {
                    !value.is_empty()
                        && value.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
                };
                valid.then(|| value.to_string())
            })
        })
}
