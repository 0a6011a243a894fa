//! Application configuration: an optional TOML file overlaid with
//! environment variables, validated once before the pipeline is built.

use crate::error::ConfigError;
use crate::extract::ExtractionConfig;
use crate::models::{PropertyType, SearchQuery};
use crate::scrapers::{ChainTiming, ProtectionConfig};
use crate::search::{tavily, SearchSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.yad2.co.il";
pub const DEFAULT_SEARCH_PATH: &str = "/realestate/rent";
pub const DEFAULT_MOBILE_URL: &str = "https://m.yad2.co.il/realestate/rent";
pub const DEFAULT_RENDERING_ENDPOINT: &str = "https://api.firecrawl.dev/v0/scrape";

pub const DEFAULT_API_ENDPOINTS: &[&str] = &[
    "https://gw.yad2.co.il/feed-search-legacy/realestate/rent",
    "https://www.yad2.co.il/api/pre-load/getFeedIndex/realestate/rent",
    "https://www.yad2.co.il/api/feed/get",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub chain: ChainConfig,
    pub protection: ProtectionConfig,
    pub extraction: ExtractionConfig,
    pub rendering: RenderingConfig,
    pub search: SearchConfig,
    pub fallback: FallbackConfig,
    pub query: QueryConfig,
    /// Upper bound on one whole acquisition call
    pub overall_budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub search_path: String,
    pub api_endpoints: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            search_path: DEFAULT_SEARCH_PATH.to_string(),
            api_endpoints: DEFAULT_API_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl SiteConfig {
    pub fn base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| ConfigError::invalid("site.base_url", e))
    }

    pub fn search_url(&self) -> Result<Url, ConfigError> {
        self.base()?
            .join(&self.search_path)
            .map_err(|e| ConfigError::invalid("site.search_path", e))
    }

    pub fn endpoints(&self) -> Result<Vec<Url>, ConfigError> {
        self.api_endpoints
            .iter()
            .map(|raw| Url::parse(raw).map_err(|e| ConfigError::invalid("site.api_endpoints", e)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    Rendering,
    ApiProbe,
    Browser,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::Rendering => write!(f, "rendering"),
            StrategyKind::ApiProbe => write!(f, "api_probe"),
            StrategyKind::Browser => write!(f, "browser"),
        }
    }
}

/// One entry of the ordered strategy list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySpec {
    pub kind: StrategyKind,
    /// Label in diagnostics; defaults to the kind
    #[serde(default)]
    pub name: Option<String>,
    /// Replaces the built-in user agent pool
    #[serde(default)]
    pub user_agents: Vec<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    /// Target page instead of the site search URL, e.g. the mobile site
    #[serde(default)]
    pub url: Option<String>,
    /// Use the mobile header profile
    #[serde(default)]
    pub mobile: bool,
}

impl StrategySpec {
    pub fn of(kind: StrategyKind) -> Self {
        Self {
            kind,
            name: None,
            user_agents: Vec::new(),
            accept_language: None,
            url: None,
            mobile: false,
        }
    }

    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Ordered strategies; empty means the built-in order
    pub strategies: Vec<StrategySpec>,
    pub timeout_secs: u64,
    pub max_strategies: Option<usize>,
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub browser_settle_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            timeout_secs: 30,
            max_strategies: None,
            delay_ms: 2000,
            jitter_ms: 1500,
            browser_settle_secs: 3,
        }
    }
}

impl ChainConfig {
    /// Configured strategies, or direct → rendering (when keyed) → mobile → API probe
    pub fn effective_strategies(&self, rendering_available: bool) -> Vec<StrategySpec> {
        if !self.strategies.is_empty() {
            return self.strategies.clone();
        }

        let mut specs = vec![StrategySpec::of(StrategyKind::Direct)];
        if rendering_available {
            specs.push(StrategySpec::of(StrategyKind::Rendering));
        }
        specs.push(StrategySpec {
            name: Some("direct_mobile".to_string()),
            url: Some(DEFAULT_MOBILE_URL.to_string()),
            mobile: true,
            ..StrategySpec::of(StrategyKind::Direct)
        });
        specs.push(StrategySpec::of(StrategyKind::ApiProbe));
        specs
    }

    pub fn timing(&self) -> ChainTiming {
        ChainTiming {
            per_strategy_timeout: Duration::from_secs(self.timeout_secs),
            max_strategies: self.max_strategies.unwrap_or(usize::MAX),
            inter_attempt_delay: Duration::from_millis(self.delay_ms),
            delay_jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub wait_min_ms: u64,
    pub wait_max_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_RENDERING_ENDPOINT.to_string(),
            wait_min_ms: 2000,
            wait_max_ms: 5000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub settings: SearchSettings,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: tavily::DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
            settings: SearchSettings::default(),
        }
    }
}

/// When the search fallback runs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    Always,
    #[default]
    OnPrimaryFailure,
    Never,
}

impl FromStr for FallbackPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "always" => Ok(FallbackPolicy::Always),
            "on_primary_failure" => Ok(FallbackPolicy::OnPrimaryFailure),
            "never" => Ok(FallbackPolicy::Never),
            other => Err(ConfigError::invalid(
                "fallback.policy",
                format!("unknown policy '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub policy: FallbackPolicy,
    pub max_results: usize,
    pub recency_only: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            policy: FallbackPolicy::OnPrimaryFailure,
            max_results: 10,
            recency_only: false,
        }
    }
}

/// The query the binary runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub city: String,
    pub sub_area: Option<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub rooms_min: Option<f32>,
    pub rooms_max: Option<f32>,
    pub property_types: Vec<PropertyType>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            city: "Tel Aviv".to_string(),
            sub_area: None,
            price_min: Some(3000),
            price_max: Some(8000),
            rooms_min: Some(2.0),
            rooms_max: Some(4.0),
            property_types: vec![PropertyType::Apartment],
        }
    }
}

impl QueryConfig {
    pub fn to_query(&self) -> SearchQuery {
        let mut query = SearchQuery::new(&self.city)
            .with_price(self.price_min, self.price_max)
            .with_rooms(self.rooms_min, self.rooms_max)
            .with_property_types(self.property_types.iter().copied());
        if let Some(sub) = &self.sub_area {
            query = query.with_sub_area(sub);
        }
        query
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::invalid(name, e))
}

impl AppConfig {
    /// Read `path` (if any), overlay the environment and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                info!(path = %path.display(), "Loaded configuration file");
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay variables provided by `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rendering_key = non_empty(lookup("RENDERING_API_KEY"))
            .or_else(|| non_empty(lookup("FIRECRAWL_API_KEY")));
        if let Some(key) = rendering_key {
            self.rendering.api_key = Some(key);
        }
        let search_key =
            non_empty(lookup("SEARCH_API_KEY")).or_else(|| non_empty(lookup("TAVILY_API_KEY")));
        if let Some(key) = search_key {
            self.search.api_key = Some(key);
        }
        if let Some(raw) = non_empty(lookup("FETCH_TIMEOUT_SECS")) {
            self.chain.timeout_secs = parse_env("FETCH_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = non_empty(lookup("MAX_STRATEGIES")) {
            self.chain.max_strategies = Some(parse_env("MAX_STRATEGIES", &raw)?);
        }
        if let Some(raw) = non_empty(lookup("FALLBACK_POLICY")) {
            self.fallback.policy = raw.parse()?;
        }
        if let Some(raw) = non_empty(lookup("ACQUIRE_BUDGET_SECS")) {
            self.overall_budget_secs = Some(parse_env("ACQUIRE_BUDGET_SECS", &raw)?);
        }
        Ok(())
    }

    pub fn rendering_key(&self) -> Option<&str> {
        self.rendering.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn search_key(&self) -> Option<&str> {
        self.search.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn strategies(&self) -> Vec<StrategySpec> {
        self.chain.effective_strategies(self.rendering_key().is_some())
    }

    pub fn budget(&self) -> Option<Duration> {
        self.overall_budget_secs.map(Duration::from_secs)
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.site.search_url()?;
        self.site.endpoints()?;

        let strategies = self.strategies();
        if strategies.is_empty() {
            return Err(ConfigError::invalid("chain.strategies", "no strategies configured"));
        }
        for spec in &strategies {
            if let Some(url) = &spec.url {
                Url::parse(url).map_err(|e| ConfigError::invalid("chain.strategies.url", e))?;
            }
        }
        if strategies.iter().any(|s| s.kind == StrategyKind::Rendering) {
            if self.rendering_key().is_none() {
                return Err(ConfigError::MissingApiKey {
                    component: "rendering",
                });
            }
            Url::parse(&self.rendering.endpoint)
                .map_err(|e| ConfigError::invalid("rendering.endpoint", e))?;
        }
        if self.rendering.wait_min_ms > self.rendering.wait_max_ms {
            return Err(ConfigError::invalid(
                "rendering.wait_min_ms",
                "must not exceed wait_max_ms",
            ));
        }
        if self.chain.timeout_secs == 0 {
            return Err(ConfigError::invalid("chain.timeout_secs", "must be positive"));
        }

        if self.fallback.policy != FallbackPolicy::Never {
            if self.search_key().is_none() {
                return Err(ConfigError::MissingApiKey { component: "search" });
            }
            Url::parse(&self.search.endpoint)
                .map_err(|e| ConfigError::invalid("search.endpoint", e))?;
        }
        self.search
            .settings
            .tz()
            .map_err(|e| ConfigError::invalid("search.timezone", e))?;

        for (i, raw) in self.extraction.listing_selectors.iter().enumerate() {
            scraper::Selector::parse(raw).map_err(|e| {
                ConfigError::invalid(format!("extraction.listing_selectors[{}]", i), e)
            })?;
        }

        Ok(())
    }
}
