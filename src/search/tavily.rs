use crate::error::SearchError;
use crate::search::{IndexHit, IndexRequest, SearchDepth, SearchIndex, MAX_INDEX_RESULTS};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://api.tavily.com/search";

/// Tavily API request
#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
    #[serde(skip_serializing_if = "no_domains")]
    include_domains: &'a [String],
}

fn no_domains(domains: &&[String]) -> bool {
    domains.is_empty()
}

/// Tavily API response
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<IndexHit>,
}

/// Tavily-compatible web search client
pub struct TavilyIndex {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl TavilyIndex {
    pub fn new(endpoint: Url, api_key: String, timeout: Duration) -> Result<Self, SearchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl SearchIndex for TavilyIndex {
    async fn search(&self, request: &IndexRequest) -> Result<Vec<IndexHit>, SearchError> {
        let body = TavilyRequest {
            api_key: &self.api_key,
            query: &request.query,
            search_depth: request.search_depth,
            max_results: request.max_results.min(MAX_INDEX_RESULTS),
            include_domains: &request.include_domains,
        };

        debug!(endpoint = %self.endpoint, max_results = body.max_results, "Sending search request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(timeout_or_network)?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(SearchError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => return Err(SearchError::RateLimited),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = s.as_u16(), "Search API error");
                return Err(SearchError::Api {
                    status: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let parsed: TavilyResponse = response.json().await.map_err(timeout_or_network)?;
        Ok(parsed.results)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

fn timeout_or_network(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout
    } else {
        SearchError::Network(e)
    }
}
