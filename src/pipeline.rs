use crate::config::{AppConfig, FallbackPolicy, StrategyKind, StrategySpec};
use crate::dedupe::Deduplicator;
use crate::error::{ConfigError, FetchError};
use crate::extract::Extractor;
use crate::models::{ListingRecord, SearchQuery};
use crate::scrapers::{
    ApiProbeStrategy, AttemptOutcome, BrowserStrategy, ChainReport, Content, DirectStrategy,
    FetchAttempt, FetchStrategy, HeaderProfile, ProtectionDetector, RenderingServiceStrategy,
    StrategyChain, StrategyResult,
};
use crate::search::{SearchFallbackEngine, TavilyIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use url::Url;

/// Operator-facing problem categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    TransportFailure,
    ProtectionDetected,
    ExtractionEmpty,
    FallbackUnavailable,
}

/// What happened during one acquisition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    pub attempts: Vec<FetchAttempt>,
    pub primary_outcome: Option<AttemptOutcome>,
    pub winning_strategy: Option<String>,
    /// Block evidence or error behind a non-success primary outcome
    pub primary_detail: Option<String>,
    pub matched_selector: Option<String>,
    pub extracted: usize,
    pub discarded_unusable: usize,
    pub duplicates_dropped: usize,
    pub fallback_invoked: bool,
    pub fallback_results: usize,
    pub fallback_error: Option<String>,
    pub issues: Vec<Issue>,
    pub budget_exhausted: bool,
    pub elapsed_ms: u64,
}

impl Diagnostics {
    fn note(&mut self, issue: Issue) {
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }

    pub fn has_issue(&self, issue: Issue) -> bool {
        self.issues.contains(&issue)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionResult {
    pub records: Vec<ListingRecord>,
    pub diagnostics: Diagnostics,
}

/// Fallback and budget behaviour of the orchestrator
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub policy: FallbackPolicy,
    pub fallback_max_results: usize,
    pub recency_only: bool,
    pub budget: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            policy: FallbackPolicy::OnPrimaryFailure,
            fallback_max_results: 10,
            recency_only: false,
            budget: None,
        }
    }
}

/// Fetch chain, extraction, deduplication and search fallback wired together
pub struct Pipeline {
    chain: StrategyChain,
    extractor: Extractor,
    fallback: Option<SearchFallbackEngine>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        chain: StrategyChain,
        extractor: Extractor,
        fallback: Option<SearchFallbackEngine>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            chain,
            extractor,
            fallback,
            settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let base = config.site.base()?;
        let search_url = config.site.search_url()?;

        let strategies = config
            .strategies()
            .iter()
            .map(|spec| build_strategy(spec, config, &base, &search_url))
            .collect::<Result<Vec<_>, _>>()?;

        let chain = StrategyChain::new(
            strategies,
            ProtectionDetector::new(&config.protection),
            config.chain.timing(),
        );
        let extractor = Extractor::from_config(&config.extraction, &base)?;

        let fallback = match (config.fallback.policy, config.search_key()) {
            (FallbackPolicy::Never, _) | (_, None) => None,
            (_, Some(key)) => {
                let endpoint = Url::parse(&config.search.endpoint)
                    .map_err(|e| ConfigError::invalid("search.endpoint", e))?;
                let index = TavilyIndex::new(
                    endpoint,
                    key.to_string(),
                    Duration::from_secs(config.search.timeout_secs),
                )
                .map_err(|e| ConfigError::invalid("search", e))?;
                let engine = SearchFallbackEngine::new(Arc::new(index), config.search.settings.clone())
                    .map_err(|e| ConfigError::invalid("search.timezone", e))?;
                Some(engine)
            }
        };

        info!(
            strategies = ?chain.strategy_names(),
            fallback = fallback.is_some(),
            "Pipeline ready"
        );

        Ok(Self::new(
            chain,
            extractor,
            fallback,
            PipelineSettings {
                policy: config.fallback.policy,
                fallback_max_results: config.fallback.max_results,
                recency_only: config.fallback.recency_only,
                budget: config.budget(),
            },
        ))
    }

    /// Run one acquisition. Never fails; problems are reported in diagnostics.
    pub async fn acquire(&self, query: &SearchQuery) -> AcquisitionResult {
        let started = Instant::now();
        // A budget too large to represent is no deadline at all
        let deadline = self
            .settings
            .budget
            .and_then(|budget| started.checked_add(budget));
        let mut diagnostics = Diagnostics::default();
        let mut dedup = Deduplicator::new();

        info!(
            city = %query.location().city,
            price = ?query.price(),
            rooms = ?query.rooms(),
            types = ?query.property_types(),
            "Starting acquisition"
        );

        let report = self.chain.fetch(query, deadline).await;
        record_chain(&report, &mut diagnostics);

        if let StrategyResult::Success(content) = &report.result {
            self.extract_into(content, &mut dedup, &mut diagnostics);
        }

        let primary_failed = !report.result.is_success() || dedup.is_empty();
        let wants_fallback = match self.settings.policy {
            FallbackPolicy::Always => true,
            FallbackPolicy::OnPrimaryFailure => primary_failed,
            FallbackPolicy::Never => false,
        };

        if wants_fallback && !diagnostics.budget_exhausted {
            self.run_fallback(query, deadline, &mut dedup, &mut diagnostics).await;
        }

        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        let records = dedup.into_records();

        info!(
            records = records.len(),
            fallback = diagnostics.fallback_invoked,
            issues = ?diagnostics.issues,
            elapsed_ms = diagnostics.elapsed_ms,
            "Acquisition finished"
        );

        AcquisitionResult {
            records,
            diagnostics,
        }
    }

    fn extract_into(&self, content: &Content, dedup: &mut Deduplicator, diagnostics: &mut Diagnostics) {
        let extraction = self.extractor.extract(content);
        diagnostics.matched_selector = extraction.selector.clone();

        for record in extraction.records {
            diagnostics.extracted += 1;
            if !record.is_usable() {
                diagnostics.discarded_unusable += 1;
                continue;
            }
            if !dedup.push(record) {
                diagnostics.duplicates_dropped += 1;
            }
        }

        if dedup.is_empty() {
            warn!(
                content = ?content.content_type(),
                extracted = diagnostics.extracted,
                "No usable listings extracted"
            );
            diagnostics.note(Issue::ExtractionEmpty);
        } else {
            info!(
                selector = ?diagnostics.matched_selector,
                kept = dedup.len(),
                discarded = diagnostics.discarded_unusable,
                "Extracted listings"
            );
        }
    }

    async fn run_fallback(
        &self,
        query: &SearchQuery,
        deadline: Option<Instant>,
        dedup: &mut Deduplicator,
        diagnostics: &mut Diagnostics,
    ) {
        let Some(engine) = &self.fallback else {
            warn!("Fallback search wanted but not configured");
            diagnostics.note(Issue::FallbackUnavailable);
            return;
        };

        diagnostics.fallback_invoked = true;
        let location = query.location_text();
        let search = engine.search(
            query,
            &location,
            self.settings.fallback_max_results,
            self.settings.recency_only,
        );

        let outcome = match deadline {
            Some(deadline) => match timeout_at(deadline, search).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Budget ran out during fallback search");
                    diagnostics.budget_exhausted = true;
                    return;
                }
            },
            None => search.await,
        };

        match outcome {
            Ok(results) => {
                diagnostics.fallback_results = results.len();
                let added = dedup.extend(results.into_iter().map(|scored| scored.listing));
                diagnostics.duplicates_dropped += diagnostics.fallback_results - added;
                info!(
                    index = engine.index_name(),
                    results = diagnostics.fallback_results,
                    added,
                    "Merged fallback results"
                );
            }
            Err(error) => {
                warn!(%error, "Fallback search failed");
                diagnostics.fallback_error = Some(error.to_string());
                diagnostics.note(Issue::FallbackUnavailable);
            }
        }
    }
}

fn record_chain(report: &ChainReport, diagnostics: &mut Diagnostics) {
    diagnostics.attempts = report.attempts.clone();
    diagnostics.primary_outcome = Some(report.result.outcome());
    diagnostics.winning_strategy = report.winning_strategy().map(str::to_string);

    match &report.result {
        StrategyResult::Success(_) => {}
        StrategyResult::Blocked(evidence) => diagnostics.primary_detail = Some(evidence.to_string()),
        StrategyResult::Failed(error) => {
            diagnostics.primary_detail = Some(error.to_string());
            if matches!(error, FetchError::BudgetExhausted) {
                diagnostics.budget_exhausted = true;
            }
        }
    }

    if report.attempts.iter().any(|a| a.protection_detected) {
        diagnostics.note(Issue::ProtectionDetected);
    }
    if report.attempts.iter().any(|a| a.transport_failure) {
        diagnostics.note(Issue::TransportFailure);
    }
}

/// Build one configured strategy
fn build_strategy(
    spec: &StrategySpec,
    config: &AppConfig,
    base: &Url,
    search_url: &Url,
) -> Result<Arc<dyn FetchStrategy>, ConfigError> {
    let label = spec.label();
    let field = format!("chain.strategies.{}", label);

    let target = match &spec.url {
        Some(url) => Url::parse(url).map_err(|e| ConfigError::invalid(&field, e))?,
        None => search_url.clone(),
    };

    let profile = match spec.kind {
        StrategyKind::ApiProbe => HeaderProfile::api(base.as_str()),
        _ if spec.mobile => HeaderProfile::mobile(),
        _ => HeaderProfile::browser(),
    };
    let headers = profile
        .with_user_agents(&spec.user_agents)
        .with_accept_language(spec.accept_language.as_deref());
    let timeout = Duration::from_secs(config.chain.timeout_secs);

    let strategy: Arc<dyn FetchStrategy> = match spec.kind {
        StrategyKind::Direct => Arc::new(
            DirectStrategy::new(label, target, headers, timeout)
                .map_err(|e| ConfigError::invalid(&field, e))?,
        ),
        StrategyKind::Rendering => {
            let key = config
                .rendering_key()
                .ok_or(ConfigError::MissingApiKey { component: "rendering" })?;
            let endpoint = Url::parse(&config.rendering.endpoint)
                .map_err(|e| ConfigError::invalid("rendering.endpoint", e))?;
            Arc::new(
                RenderingServiceStrategy::new(
                    endpoint,
                    key,
                    target,
                    headers,
                    config.rendering.wait_min_ms..=config.rendering.wait_max_ms,
                    Duration::from_secs(config.rendering.timeout_secs),
                )
                .map_err(|e| ConfigError::invalid(&field, e))?,
            )
        }
        StrategyKind::ApiProbe => Arc::new(
            ApiProbeStrategy::new(config.site.endpoints()?, headers, timeout)
                .map_err(|e| ConfigError::invalid(&field, e))?,
        ),
        StrategyKind::Browser => Arc::new(BrowserStrategy::new(
            target,
            headers,
            Duration::from_secs(config.chain.browser_settle_secs),
        )),
    };

    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::extract::ExtractionConfig;
    use crate::scrapers::{ChainTiming, RawResponse};
    use crate::search::{IndexHit, IndexRequest, SearchIndex, SearchSettings};
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        response: Option<RawResponse>,
        delay: Duration,
    }

    #[async_trait]
    impl FetchStrategy for Fixed {
        async fn execute(&self, _query: &SearchQuery) -> Result<RawResponse, FetchError> {
            tokio::time::sleep(self.delay).await;
            self.response
                .clone()
                .ok_or_else(|| FetchError::Browser("connection reset".to_string()))
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn fixed(name: &'static str, status: u16, body: &str) -> Arc<dyn FetchStrategy> {
        Arc::new(Fixed {
            name,
            response: Some(RawResponse::html(status, body)),
            delay: Duration::ZERO,
        })
    }

    struct StaticIndex(Vec<IndexHit>);

    #[async_trait]
    impl SearchIndex for StaticIndex {
        async fn search(&self, _request: &IndexRequest) -> Result<Vec<IndexHit>, SearchError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl SearchIndex for BrokenIndex {
        async fn search(&self, _request: &IndexRequest) -> Result<Vec<IndexHit>, SearchError> {
            Err(SearchError::RateLimited)
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn listing_page(count: usize) -> String {
        let items: String = (0..count)
            .map(|i| {
                format!(
                    r#"<div data-testid="feed-item" data-item-id="{id}">
                         <a href="/item/{id}"><span class="title">Apartment number {id}</span></a>
                         <span class="price">{price} ₪</span>
                       </div>"#,
                    id = 100 + i,
                    price = 5000 + i
                )
            })
            .collect();
        format!("<html><body><div class=\"feed\">{}</div>{}</body></html>", items, " ".repeat(600))
    }

    fn hits(urls: &[&str]) -> Vec<IndexHit> {
        urls.iter()
            .map(|url| IndexHit {
                title: "דירה להשכרה".to_string(),
                url: url.to_string(),
                content: "apartment 3 rooms 6,000 ₪".to_string(),
                score: 0.9,
                published_date: None,
            })
            .collect()
    }

    fn pipeline(
        strategies: Vec<Arc<dyn FetchStrategy>>,
        index: Option<Arc<dyn SearchIndex>>,
        settings: PipelineSettings,
    ) -> Pipeline {
        let timing = ChainTiming {
            per_strategy_timeout: Duration::from_secs(5),
            max_strategies: usize::MAX,
            inter_attempt_delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
        };
        let chain = StrategyChain::new(strategies, ProtectionDetector::default(), timing);
        let base = Url::parse("https://www.yad2.co.il").unwrap();
        let extractor = Extractor::from_config(&ExtractionConfig::default(), &base).unwrap();
        let fallback = index.map(|index| SearchFallbackEngine::new(index, SearchSettings::default()).unwrap());
        Pipeline::new(chain, extractor, fallback, settings)
    }

    fn query() -> SearchQuery {
        SearchQuery::new("Tel Aviv").with_price(Some(3000), Some(8000))
    }

    #[tokio::test]
    async fn blocked_then_success_yields_records_without_fallback() {
        let index: Arc<dyn SearchIndex> = Arc::new(StaticIndex(hits(&["https://a.test/item/1"])));
        let pipeline = pipeline(
            vec![fixed("direct", 403, "Forbidden"), fixed("rendering", 200, &listing_page(3))],
            Some(index),
            PipelineSettings::default(),
        );

        let result = pipeline.acquire(&query()).await;
        let d = &result.diagnostics;

        assert_eq!(result.records.len(), 3);
        assert_eq!(d.attempts.len(), 2);
        assert_eq!(d.attempts[0].outcome, AttemptOutcome::Blocked);
        assert_eq!(d.attempts[1].outcome, AttemptOutcome::Success);
        assert_eq!(d.winning_strategy.as_deref(), Some("rendering"));
        assert_eq!(d.matched_selector.as_deref(), Some(r#"div[data-testid="feed-item"]"#));
        assert!(!d.fallback_invoked);
        assert!(d.has_issue(Issue::ProtectionDetected));
    }

    #[tokio::test]
    async fn fallback_merges_and_dedupes_when_primary_is_blocked() {
        let index: Arc<dyn SearchIndex> = Arc::new(StaticIndex(hits(&[
            "https://www.yad2.co.il/item/a",
            "https://www.yad2.co.il/item/b",
            "https://www.yad2.co.il/item/b#top",
            "https://www.yad2.co.il/item/c",
            "https://www.yad2.co.il/item/d",
        ])));
        let pipeline = pipeline(
            vec![fixed("direct", 403, ""), fixed("mobile", 429, "")],
            Some(index),
            PipelineSettings {
                policy: FallbackPolicy::Always,
                ..PipelineSettings::default()
            },
        );

        let result = pipeline.acquire(&query()).await;
        assert_eq!(result.records.len(), 4);
        assert!(result.diagnostics.fallback_invoked);
        assert_eq!(result.diagnostics.fallback_results, 5);
        assert_eq!(result.diagnostics.duplicates_dropped, 1);
        assert_eq!(result.diagnostics.primary_outcome, Some(AttemptOutcome::Failed));
    }

    #[tokio::test]
    async fn empty_extraction_counts_as_primary_failure() {
        let index: Arc<dyn SearchIndex> = Arc::new(StaticIndex(hits(&["https://a.test/item/9"])));
        let empty_page = format!("<html><body><p>No results</p>{}</body></html>", " ".repeat(600));
        let pipeline = pipeline(
            vec![fixed("direct", 200, &empty_page)],
            Some(index),
            PipelineSettings::default(),
        );

        let result = pipeline.acquire(&query()).await;
        assert!(result.diagnostics.has_issue(Issue::ExtractionEmpty));
        assert!(result.diagnostics.fallback_invoked);
        assert_eq!(result.records.len(), 1);
    }

    #[tokio::test]
    async fn missing_or_failing_index_is_reported() {
        let settings = PipelineSettings {
            policy: FallbackPolicy::Always,
            ..PipelineSettings::default()
        };

        let without = pipeline(vec![fixed("direct", 403, "")], None, settings);
        let result = without.acquire(&query()).await;
        assert!(result.records.is_empty());
        assert!(!result.diagnostics.fallback_invoked);
        assert!(result.diagnostics.has_issue(Issue::FallbackUnavailable));

        let broken_index: Arc<dyn SearchIndex> = Arc::new(BrokenIndex);
        let broken = pipeline(vec![fixed("direct", 403, "")], Some(broken_index), settings);
        let result = broken.acquire(&query()).await;
        assert!(result.diagnostics.fallback_invoked);
        assert!(result.diagnostics.fallback_error.is_some());
        assert!(result.diagnostics.has_issue(Issue::FallbackUnavailable));
    }

    #[tokio::test]
    async fn never_policy_skips_fallback() {
        let index: Arc<dyn SearchIndex> = Arc::new(StaticIndex(hits(&["https://a.test/item/1"])));
        let pipeline = pipeline(
            vec![fixed("direct", 403, "")],
            Some(index),
            PipelineSettings {
                policy: FallbackPolicy::Never,
                ..PipelineSettings::default()
            },
        );
        let result = pipeline.acquire(&query()).await;
        assert!(result.records.is_empty());
        assert!(!result.diagnostics.fallback_invoked);
    }

    #[tokio::test]
    async fn transport_failures_are_flagged() {
        let failing: Arc<dyn FetchStrategy> = Arc::new(Fixed {
            name: "direct",
            response: None,
            delay: Duration::ZERO,
        });
        let pipeline = pipeline(
            vec![failing],
            None,
            PipelineSettings {
                policy: FallbackPolicy::Never,
                ..PipelineSettings::default()
            },
        );
        let result = pipeline.acquire(&query()).await;
        assert!(result.diagnostics.has_issue(Issue::TransportFailure));
        assert!(result.diagnostics.attempts[0].transport_failure);
        assert!(result.diagnostics.primary_detail.is_some());
    }

    #[tokio::test]
    async fn error_statuses_are_not_transport_failures() {
        let pipeline = pipeline(
            vec![fixed("direct", 500, &listing_page(1))],
            None,
            PipelineSettings {
                policy: FallbackPolicy::Never,
                ..PipelineSettings::default()
            },
        );
        let result = pipeline.acquire(&query()).await;
        assert!(!result.diagnostics.has_issue(Issue::TransportFailure));
        assert_eq!(result.diagnostics.attempts[0].status, Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_bounds_the_call() {
        let slow: Arc<dyn FetchStrategy> = Arc::new(Fixed {
            name: "slow",
            response: Some(RawResponse::html(200, listing_page(2))),
            delay: Duration::from_secs(60),
        });
        let pipeline = pipeline(
            vec![slow, fixed("never_reached", 200, &listing_page(2))],
            None,
            PipelineSettings {
                policy: FallbackPolicy::Never,
                budget: Some(Duration::from_secs(2)),
                ..PipelineSettings::default()
            },
        );

        let started = Instant::now();
        let result = pipeline.acquire(&query()).await;
        assert!(started.elapsed() <= Duration::from_secs(3));
        assert!(result.diagnostics.budget_exhausted);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn oversized_budget_means_no_deadline() {
        let pipeline = pipeline(
            vec![fixed("direct", 200, &listing_page(2))],
            None,
            PipelineSettings {
                policy: FallbackPolicy::Never,
                budget: Some(Duration::from_secs(u64::MAX)),
                ..PipelineSettings::default()
            },
        );

        let result = pipeline.acquire(&query()).await;
        assert_eq!(result.records.len(), 2);
        assert!(!result.diagnostics.budget_exhausted);
    }

    #[test]
    fn pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }
}
