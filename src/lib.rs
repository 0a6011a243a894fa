//! Rental listing acquisition: a chain of fetch strategies against a
//! protected listing site, tolerant extraction, deduplication and a web
//! search fallback.

pub mod config;
pub mod dedupe;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod scrapers;
pub mod search;

pub use config::{AppConfig, FallbackPolicy};
pub use error::{ConfigError, FetchError, SearchError};
pub use models::{ListingRecord, Location, SearchQuery, Source};
pub use pipeline::{AcquisitionResult, Diagnostics, Issue, Pipeline, PipelineSettings};
