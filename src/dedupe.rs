//! Collapses repeated listings into a unique set, keeping the first sighting.

use crate::extract::fields::content_hash;
use crate::models::ListingRecord;
use std::collections::HashSet;
use url::Url;

/// Identity of a listing across sources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupeKey {
    Url(String),
    Id(String),
    Content(String),
}

impl DedupeKey {
    pub fn for_record(record: &ListingRecord) -> Self {
        if !record.url.trim().is_empty() {
            return DedupeKey::Url(normalize_url(&record.url));
        }
        if !record.id.trim().is_empty() {
            return DedupeKey::Id(record.id.trim().to_string());
        }
        let title: String = record.title.to_lowercase().chars().take(100).collect();
        let fingerprint = format!(
            "{}|{}|{}",
            record.price.map(|p| p.to_string()).unwrap_or_default(),
            record.location.text.to_lowercase(),
            title
        );
        DedupeKey::Content(content_hash(&fingerprint))
    }
}

/// Canonical form of a listing URL; unparseable input is only trimmed
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let Ok(mut url) = Url::parse(raw) else {
        return raw.trim_end_matches('/').to_string();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !key.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    // Url already lowercases scheme and host
    let mut normalized = url.to_string();
    if url.query().is_none() {
        while normalized.ends_with('/') && normalized.len() > url.scheme().len() + 3 {
            normalized.pop();
        }
    }
    normalized
}

/// Stateful deduplicator so later batches merge against earlier ones
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupeKey>,
    kept: Vec<ListingRecord>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `record` unless an equal key was already seen
    pub fn push(&mut self, record: ListingRecord) -> bool {
        if self.seen.insert(DedupeKey::for_record(&record)) {
            self.kept.push(record);
            true
        } else {
            false
        }
    }

    /// Push every record, returning how many were new
    pub fn extend(&mut self, records: impl IntoIterator<Item = ListingRecord>) -> usize {
        let mut added = 0;
        for record in records {
            if self.push(record) {
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }

    pub fn into_records(self) -> Vec<ListingRecord> {
        self.kept
    }
}

/// Unique records in order of first occurrence
pub fn dedupe(records: impl IntoIterator<Item = ListingRecord>) -> Vec<ListingRecord> {
    let mut deduplicator = Deduplicator::new();
    deduplicator.extend(records);
    deduplicator.into_records()
}
