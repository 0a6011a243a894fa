use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::headers::HeaderProfile;
use crate::scrapers::traits::FetchStrategy;
use crate::scrapers::types::RawResponse;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Probes the site's JSON endpoints, which are sometimes guarded less
/// strictly than the rendered pages.
pub struct ApiProbeStrategy {
    client: Client,
    endpoints: Vec<Url>,
    headers: HeaderProfile,
}

impl ApiProbeStrategy {
    pub fn new(
        endpoints: Vec<Url>,
        headers: HeaderProfile,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).cookie_store(true).build()?;

        Ok(Self {
            client,
            endpoints,
            headers,
        })
    }
}

#[async_trait]
impl FetchStrategy for ApiProbeStrategy {
    async fn execute(&self, query: &SearchQuery) -> Result<RawResponse, FetchError> {
        let mut last_response: Option<RawResponse> = None;
        let mut last_error: Option<FetchError> = None;

        for endpoint in &self.endpoints {
            let url = query.site_url(endpoint);
            info!(%url, "Probing API endpoint");

            let response = match self.client.get(url).headers(self.headers.build()).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "API probe request failed");
                    last_error = Some(e.into());
                    continue;
                }
            };

            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = Some(e.into());
                    continue;
                }
            };

            if status == 200 && serde_json::from_str::<serde_json::Value>(&body).is_ok() {
                debug!(endpoint = %endpoint, bytes = body.len(), "API endpoint answered with JSON");
                return Ok(RawResponse::json(status, body));
            }

            debug!(endpoint = %endpoint, status, "API endpoint gave no JSON");
            last_response = Some(RawResponse::html(status, body));
        }

        match (last_response, last_error) {
            (Some(response), _) => Ok(response),
            (None, Some(error)) => Err(error),
            (None, None) => Err(FetchError::Exhausted { attempted: 0 }),
        }
    }

    fn name(&self) -> &str {
        "api_probe"
    }
}
