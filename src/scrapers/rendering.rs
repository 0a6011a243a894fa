use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::headers::HeaderProfile;
use crate::scrapers::traits::FetchStrategy;
use crate::scrapers::types::RawResponse;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::ops::RangeInclusive;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Envelope returned by the rendering service
#[derive(Debug, Deserialize)]
struct RenderEnvelope {
    success: Option<bool>,
    error: Option<String>,
    data: Option<RenderData>,
    html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenderData {
    html: Option<String>,
    #[serde(rename = "rawHtml")]
    raw_html: Option<String>,
    json: Option<serde_json::Value>,
    metadata: Option<RenderMetadata>,
}

#[derive(Debug, Deserialize)]
struct RenderMetadata {
    #[serde(rename = "pageStatusCode", alias = "statusCode")]
    page_status_code: Option<u16>,
}

/// Delegates the fetch to a third-party headless rendering service
pub struct RenderingServiceStrategy {
    client: Client,
    endpoint: Url,
    api_key: String,
    search_url: Url,
    headers: HeaderProfile,
    wait_for_ms: RangeInclusive<u64>,
}

impl RenderingServiceStrategy {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        search_url: Url,
        headers: HeaderProfile,
        wait_for_ms: RangeInclusive<u64>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            search_url,
            headers,
            wait_for_ms,
        })
    }

    fn request_body(&self, target: &Url) -> serde_json::Value {
        let wait_for = if self.wait_for_ms.is_empty() {
            *self.wait_for_ms.start()
        } else {
            rand::thread_rng().gen_range(self.wait_for_ms.clone())
        };

        json!({
            "url": target.as_str(),
            "pageOptions": {
                "waitFor": wait_for,
                "headers": self.headers.build_map(),
                "includeHtml": true,
                "includeRawHtml": true,
                "onlyMainContent": false,
                "screenshot": false,
            }
        })
    }
}

/// Pull the page out of the service envelope
fn unwrap_envelope(envelope: RenderEnvelope) -> Result<RawResponse, FetchError> {
    if envelope.success == Some(false) {
        let reason = envelope.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(FetchError::Rendering(reason));
    }

    let (html, json, page_status) = match envelope.data {
        Some(data) => (
            data.html.or(data.raw_html).or(envelope.html),
            data.json,
            data.metadata.and_then(|m| m.page_status_code),
        ),
        None => (envelope.html, None, None),
    };
    let status = page_status.unwrap_or(200);

    if let Some(html) = html {
        return Ok(RawResponse::html(status, html));
    }
    if let Some(json) = json {
        return Ok(RawResponse::json(status, json.to_string()));
    }

    Err(FetchError::Rendering("envelope carried no page content".to_string()))
}

#[async_trait]
impl FetchStrategy for RenderingServiceStrategy {
    async fn execute(&self, query: &SearchQuery) -> Result<RawResponse, FetchError> {
        let target = query.site_url(&self.search_url);
        let body = self.request_body(&target);

        info!(%target, "Scraping through rendering service");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), error = %text, "Rendering service error");
            return Err(FetchError::Rendering(format!("HTTP {}", status.as_u16())));
        }

        let envelope: RenderEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        unwrap_envelope(envelope)
    }

    fn name(&self) -> &str {
        "rendering"
    }
}
