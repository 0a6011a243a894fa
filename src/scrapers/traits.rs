use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::types::{Content, RawResponse};
use async_trait::async_trait;

/// Common trait for all fetch strategies.
/// A strategy knows how to reach the listing site one particular way; the
/// chain decides whether what came back is usable.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Perform the request for `query`. Transport problems are errors; any
    /// answer from the target, even a challenge page, is a `RawResponse`.
    async fn execute(&self, query: &SearchQuery) -> Result<RawResponse, FetchError>;

    /// Turn a body the detector accepted into typed content
    fn decode(&self, raw: RawResponse) -> Result<Content, FetchError> {
        raw.into_content()
    }

    /// Identifier reported in diagnostics
    fn name(&self) -> &str;
}
