use crate::error::FetchError;
use crate::models::SearchQuery;
use crate::scrapers::protection::{ProtectionDetector, Verdict};
use crate::scrapers::traits::FetchStrategy;
use crate::scrapers::types::{AttemptOutcome, ChainReport, FetchAttempt, StrategyResult};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

/// Timing knobs of the chain
#[derive(Debug, Clone, Copy)]
pub struct ChainTiming {
    pub per_strategy_timeout: Duration,
    pub max_strategies: usize,
    pub inter_attempt_delay: Duration,
    /// Upper bound of random extra delay added between attempts
    pub delay_jitter: Duration,
}

impl Default for ChainTiming {
    fn default() -> Self {
        Self {
            per_strategy_timeout: Duration::from_secs(30),
            max_strategies: usize::MAX,
            inter_attempt_delay: Duration::from_secs(2),
            delay_jitter: Duration::from_millis(1500),
        }
    }
}

/// Runs strategies one after another, in declared order, until one yields
/// usable content.
pub struct StrategyChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    detector: ProtectionDetector,
    timing: ChainTiming,
}

impl StrategyChain {
    pub fn new(
        strategies: Vec<Arc<dyn FetchStrategy>>,
        detector: ProtectionDetector,
        timing: ChainTiming,
    ) -> Self {
        Self {
            strategies,
            detector,
            timing,
        }
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Fetch content for `query`. Always returns a report; `deadline` bounds
    /// the whole run including delays.
    pub async fn fetch(&self, query: &SearchQuery, deadline: Option<Instant>) -> ChainReport {
        let mut attempts = Vec::new();
        let limit = self.timing.max_strategies.min(self.strategies.len());

        for (index, strategy) in self.strategies.iter().take(limit).enumerate() {
            if index > 0 {
                let pause = self.pause();
                if exceeds(deadline, pause) {
                    warn!("Budget too small for another strategy");
                    return budget_exhausted(attempts);
                }
                tokio::time::sleep(pause).await;
            }

            let allowed = match remaining(deadline) {
                Some(left) if left.is_zero() => return budget_exhausted(attempts),
                Some(left) => left.min(self.timing.per_strategy_timeout),
                None => self.timing.per_strategy_timeout,
            };

            let (result, attempt) = self.run_one(strategy.as_ref(), query, allowed).await;
            attempts.push(attempt);

            if result.is_success() {
                info!(strategy = strategy.name(), "Strategy produced usable content");
                return ChainReport { result, attempts };
            }

            if matches!(result, StrategyResult::Failed(FetchError::Timeout(_)))
                && remaining(deadline).is_some_and(|left| left.is_zero())
            {
                return budget_exhausted(attempts);
            }
        }

        warn!(attempted = attempts.len(), "All strategies exhausted");
        ChainReport {
            result: StrategyResult::Failed(FetchError::Exhausted {
                attempted: attempts.len(),
            }),
            attempts,
        }
    }

    async fn run_one(
        &self,
        strategy: &dyn FetchStrategy,
        query: &SearchQuery,
        allowed: Duration,
    ) -> (StrategyResult, FetchAttempt) {
        let started = Instant::now();
        let outcome = timeout(allowed, strategy.execute(query)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut attempt = FetchAttempt {
            strategy: strategy.name().to_string(),
            status: None,
            elapsed_ms,
            protection_detected: false,
            body_bytes: 0,
            outcome: AttemptOutcome::Failed,
            transport_failure: false,
            detail: None,
        };

        let raw = match outcome {
            Err(_) => {
                warn!(strategy = strategy.name(), ?allowed, "Strategy timed out");
                let error = FetchError::Timeout(allowed);
                attempt.transport_failure = error.is_transport();
                attempt.detail = Some(error.to_string());
                return (StrategyResult::Failed(error), attempt);
            }
            Ok(Err(error)) => {
                warn!(strategy = strategy.name(), %error, "Strategy failed");
                attempt.transport_failure = error.is_transport();
                attempt.detail = Some(error.to_string());
                return (StrategyResult::Failed(error), attempt);
            }
            Ok(Ok(raw)) => raw,
        };

        attempt.status = Some(raw.status);
        attempt.body_bytes = raw.body.len();

        let result = match self.detector.detect(&raw.body, raw.status) {
            Verdict::Blocked(evidence) => {
                warn!(strategy = strategy.name(), status = raw.status, %evidence, "Protection detected");
                attempt.protection_detected = true;
                attempt.detail = Some(evidence.to_string());
                StrategyResult::Blocked(evidence)
            }
            Verdict::Clear if !(200..300).contains(&raw.status) => {
                let error = FetchError::HttpStatus(raw.status);
                attempt.detail = Some(error.to_string());
                StrategyResult::Failed(error)
            }
            Verdict::Clear => match strategy.decode(raw) {
                Ok(content) => StrategyResult::Success(content),
                Err(error) => {
                    attempt.detail = Some(error.to_string());
                    StrategyResult::Failed(error)
                }
            },
        };

        attempt.outcome = result.outcome();
        info!(
            strategy = %attempt.strategy,
            status = ?attempt.status,
            elapsed_ms = attempt.elapsed_ms,
            bytes = attempt.body_bytes,
            outcome = ?attempt.outcome,
            "Strategy attempt finished"
        );
        (result, attempt)
    }

    fn pause(&self) -> Duration {
        let jitter_ms = self.timing.delay_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.timing.inter_attempt_delay + Duration::from_millis(extra)
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn exceeds(deadline: Option<Instant>, pause: Duration) -> bool {
    remaining(deadline).is_some_and(|left| left <= pause)
}

fn budget_exhausted(attempts: Vec<FetchAttempt>) -> ChainReport {
    ChainReport {
        result: StrategyResult::Failed(FetchError::BudgetExhausted),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::types::{Content, RawResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        response: Option<RawResponse>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, response: Option<RawResponse>) -> Arc<Self> {
            Arc::new(Self {
                name,
                response,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                response: Some(RawResponse::html(200, listing_page())),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        async fn execute(&self, _query: &SearchQuery) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response
                .clone()
                .ok_or_else(|| FetchError::Rendering("scripted failure".to_string()))
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn listing_page() -> String {
        format!("<html><body>{}</body></html>", "<div class=\"feeditem\">דירה</div>".repeat(40))
    }

    fn fast_timing() -> ChainTiming {
        ChainTiming {
            per_strategy_timeout: Duration::from_secs(5),
            max_strategies: 10,
            inter_attempt_delay: Duration::ZERO,
            delay_jitter: Duration::ZERO,
        }
    }

    fn chain(strategies: Vec<Arc<dyn FetchStrategy>>, timing: ChainTiming) -> StrategyChain {
        StrategyChain::new(strategies, ProtectionDetector::default(), timing)
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let first = Scripted::new("first", Some(RawResponse::html(200, listing_page())));
        let second = Scripted::new("second", Some(RawResponse::html(200, listing_page())));
        let report = chain(vec![first.clone(), second.clone()], fast_timing())
            .fetch(&SearchQuery::new("Tel Aviv"), None)
            .await;

        assert!(report.result.is_success());
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.winning_strategy(), Some("first"));
    }

    #[tokio::test]
    async fn blocked_and_failed_fall_through_in_order() {
        let blocked = Scripted::new("blocked", Some(RawResponse::html(403, listing_page())));
        let broken = Scripted::new("broken", None);
        let good = Scripted::new("good", Some(RawResponse::html(200, listing_page())));
        let report = chain(vec![blocked, broken, good], fast_timing())
            .fetch(&SearchQuery::new("Tel Aviv"), None)
            .await;

        let outcomes: Vec<_> = report.attempts.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![AttemptOutcome::Blocked, AttemptOutcome::Failed, AttemptOutcome::Success]
        );
        assert!(report.attempts[0].protection_detected);
        assert_eq!(report.attempts[0].status, Some(403));
        // A rendering service error is an answer, not a lost connection
        assert!(!report.attempts[1].transport_failure);
        assert!(matches!(report.result, StrategyResult::Success(Content::Html(_))));
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let a = Scripted::new("a", Some(RawResponse::html(200, "tiny")));
        let b = Scripted::new("b", None);
        let report = chain(vec![a, b], fast_timing())
            .fetch(&SearchQuery::new("Haifa"), None)
            .await;

        assert!(matches!(
            report.result,
            StrategyResult::Failed(FetchError::Exhausted { attempted: 2 })
        ));
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.winning_strategy(), None);
    }

    #[tokio::test]
    async fn non_success_status_without_markers_is_a_failure() {
        let gone = Scripted::new("gone", Some(RawResponse::html(500, listing_page())));
        let report = chain(vec![gone], fast_timing())
            .fetch(&SearchQuery::new("Haifa"), None)
            .await;
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failed);
        assert!(!report.attempts[0].protection_detected);
    }

    #[tokio::test]
    async fn max_strategies_caps_the_chain() {
        let a = Scripted::new("a", None);
        let b = Scripted::new("b", None);
        let timing = ChainTiming {
            max_strategies: 1,
            ..fast_timing()
        };
        let report = chain(vec![a, b.clone()], timing)
            .fetch(&SearchQuery::new("Haifa"), None)
            .await;
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_strategy_times_out_and_chain_moves_on() {
        let slow = Scripted::slow("slow", Duration::from_secs(10));
        let good = Scripted::new("good", Some(RawResponse::html(200, listing_page())));
        let timing = ChainTiming {
            per_strategy_timeout: Duration::from_millis(50),
            ..fast_timing()
        };
        let report = chain(vec![slow, good], timing)
            .fetch(&SearchQuery::new("Haifa"), None)
            .await;
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Failed);
        assert!(report.attempts[0].transport_failure);
        assert!(report.result.is_success());
    }

    #[tokio::test]
    async fn deadline_stops_the_chain() {
        let slow = Scripted::slow("slow", Duration::from_secs(10));
        let never = Scripted::new("never", Some(RawResponse::html(200, listing_page())));
        let deadline = Instant::now() + Duration::from_millis(50);
        let report = chain(vec![slow, never.clone()], fast_timing())
            .fetch(&SearchQuery::new("Haifa"), Some(deadline))
            .await;

        assert!(matches!(
            report.result,
            StrategyResult::Failed(FetchError::BudgetExhausted)
        ));
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
    }
}
