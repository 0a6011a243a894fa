use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::headers::HeaderProfile;
use crate::scrapers::traits::FetchStrategy;
use crate::scrapers::types::RawResponse;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Plain HTTP request against the site search page with rotated headers
pub struct DirectStrategy {
    name: String,
    client: Client,
    search_url: Url,
    headers: HeaderProfile,
}

impl DirectStrategy {
    /// Create a direct strategy hitting `search_url` (query parameters are appended per call)
    pub fn new(
        name: impl Into<String>,
        search_url: Url,
        headers: HeaderProfile,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            name: name.into(),
            client,
            search_url,
            headers,
        })
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    async fn execute(&self, query: &SearchQuery) -> Result<RawResponse, FetchError> {
        let url = query.site_url(&self.search_url);
        info!(strategy = %self.name, %url, "Fetching search page");

        let response = self
            .client
            .get(url)
            .headers(self.headers.build())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(strategy = %self.name, status, bytes = body.len(), "Downloaded search page");

        Ok(RawResponse::html(status, body))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
