use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::headers::HeaderProfile;
use crate::scrapers::traits::FetchStrategy;
use crate::scrapers::types::RawResponse;
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const CONSENT_SCRIPT: &str = r#"
const button = document.querySelector('button[id*="accept"], button[id*="consent"], button[id*="agree"]');
if (button) button.click();
"#;

/// Renders the search page in a local headless Chrome
pub struct BrowserStrategy {
    search_url: Url,
    headers: HeaderProfile,
    settle: Duration,
}

impl BrowserStrategy {
    pub fn new(search_url: Url, headers: HeaderProfile, settle: Duration) -> Self {
        Self {
            search_url,
            headers,
            settle,
        }
    }
}

/// Blocking browser session; runs on the blocking pool
fn render_page(url: &str, user_agent: &str, accept_language: &str, settle: Duration) -> Result<String> {
    info!("Launching headless Chrome...");

    let options = LaunchOptions::default_builder()
        .headless(true)
        .build()
        .context("Failed to build launch options")?;

    let browser = Browser::new(options).context("Failed to launch Chrome browser")?;
    let tab = browser.new_tab()?;

    tab.set_user_agent(user_agent, Some(accept_language), None)?;
    tab.navigate_to(url)?;
    tab.wait_until_navigated()?;

    // Listing cards are rendered client-side after navigation completes
    thread::sleep(settle);

    if tab.evaluate(CONSENT_SCRIPT, false).is_err() {
        warn!("Cookie consent script failed, continuing");
    }
    thread::sleep(Duration::from_millis(500));

    let html = tab
        .evaluate("document.documentElement.outerHTML", false)?
        .value
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    info!("Captured {} bytes of rendered HTML", html.len());
    Ok(html)
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    async fn execute(&self, query: &SearchQuery) -> Result<RawResponse, FetchError> {
        let url = query.site_url(&self.search_url).to_string();
        let user_agent = self.headers.pick_user_agent().to_string();
        let accept_language = self.headers.accept_language().to_string();
        let settle = self.settle;

        let html = tokio::task::spawn_blocking(move || {
            render_page(&url, &user_agent, &accept_language, settle)
        })
        .await
        .map_err(|e| FetchError::Browser(e.to_string()))?
        .map_err(|e| FetchError::Browser(format!("{:#}", e)))?;

        // The DevTools session does not expose the document status
        Ok(RawResponse::html(200, html))
    }

    fn name(&self) -> &str {
        "browser"
    }
}
