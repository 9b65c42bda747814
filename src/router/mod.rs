//! Router (C6, spec §4.6): selects a domain for a request using five
//! cascading strategies, recording per-strategy routing metrics.
//!
//! Grounded in the teacher's routing-adjacent code (`api/intent.rs`,
//! `agentic/intent_classifier.rs`) for the "score candidates, pick the
//! best, record why" shape, generalised into the spec's explicit five
//! fixed-order strategies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::NoDomainError;
use crate::registry::DomainRegistry;
use crate::resolver::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStrategy {
    ExplicitSwitch,
    VerbAnalysis,
    ContextInference,
    KeywordMatch,
    DefaultFallback,
}

impl RoutingStrategy {
    fn confidence(self) -> f64 {
        match self {
            RoutingStrategy::ExplicitSwitch => 1.0,
            RoutingStrategy::VerbAnalysis => 0.9,
            RoutingStrategy::ContextInference => 0.75,
            RoutingStrategy::KeywordMatch => 0.6,
            RoutingStrategy::DefaultFallback => 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub current_domain: Option<String>,
    pub context: Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResponse {
    pub domain: String,
    pub strategy: RoutingStrategy,
    pub confidence: f64,
    pub rationale: String,
}

/// A small alias table, e.g. `hf -> hedge-fund-investor`, plus tolerant
/// normalisation (spaces ↔ hyphens) for `ExplicitSwitch`.
#[derive(Debug, Clone, Default)]
pub struct DomainAliases(HashMap<String, String>);

impl DomainAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alias: &str, domain: &str) -> Self {
        self.0.insert(alias.to_lowercase(), domain.to_string());
        self
    }

    fn resolve(&self, candidate: &str) -> String {
        let normalized = candidate.to_lowercase();
        self.0
            .get(&normalized)
            .cloned()
            .unwrap_or_else(|| normalized.replace(' ', "-"))
    }
}

#[derive(Default)]
struct StrategyMetrics {
    count: AtomicU64,
    /// Bounded ring buffer of recent latencies, for p50/p95.
    recent_latencies_ms: Mutex<VecDeque<u64>>,
}

impl StrategyMetrics {
    async fn record(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut buf = self.recent_latencies_ms.lock().await;
        const CAP: usize = 256;
        if buf.len() == CAP {
            buf.pop_front();
        }
        buf.push_back(elapsed.as_millis() as u64);
    }

    async fn percentile(&self, p: f64) -> Option<u64> {
        let buf = self.recent_latencies_ms.lock().await;
        if buf.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = buf.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted.get(idx).copied()
    }
}

/// Per-strategy counters, last-chosen domain, and p50/p95 latency (spec
/// §4.6 "records per-strategy counters...").
#[derive(Default)]
pub struct RouterMetrics {
    explicit_switch: StrategyMetrics,
    verb_analysis: StrategyMetrics,
    context_inference: StrategyMetrics,
    keyword_match: StrategyMetrics,
    default_fallback: StrategyMetrics,
    last_chosen_domain: Mutex<Option<String>>,
}

impl RouterMetrics {
    fn for_strategy(&self, strategy: RoutingStrategy) -> &StrategyMetrics {
        match strategy {
            RoutingStrategy::ExplicitSwitch => &self.explicit_switch,
            RoutingStrategy::VerbAnalysis => &self.verb_analysis,
            RoutingStrategy::ContextInference => &self.context_inference,
            RoutingStrategy::KeywordMatch => &self.keyword_match,
            RoutingStrategy::DefaultFallback => &self.default_fallback,
        }
    }

    pub async fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            explicit_switch_count: self.explicit_switch.count.load(Ordering::Relaxed),
            verb_analysis_count: self.verb_analysis.count.load(Ordering::Relaxed),
            context_inference_count: self.context_inference.count.load(Ordering::Relaxed),
            keyword_match_count: self.keyword_match.count.load(Ordering::Relaxed),
            default_fallback_count: self.default_fallback.count.load(Ordering::Relaxed),
            last_chosen_domain: self.last_chosen_domain.lock().await.clone(),
            p50_ms: self.overall_percentile(0.5).await,
            p95_ms: self.overall_percentile(0.95).await,
        }
    }

    async fn overall_percentile(&self, p: f64) -> Option<u64> {
        let all = [
            &self.explicit_switch,
            &self.verb_analysis,
            &self.context_inference,
            &self.keyword_match,
            &self.default_fallback,
        ];
        let mut combined = Vec::new();
        for m in all {
            combined.extend(m.recent_latencies_ms.lock().await.iter().copied());
        }
        if combined.is_empty() {
            return None;
        }
        combined.sort_unstable();
        let idx = ((combined.len() - 1) as f64 * p).round() as usize;
        combined.get(idx).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterMetricsSnapshot {
    pub explicit_switch_count: u64,
    pub verb_analysis_count: u64,
    pub context_inference_count: u64,
    pub keyword_match_count: u64,
    pub default_fallback_count: u64,
    pub last_chosen_domain: Option<String>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
}

pub struct Router {
    registry: Arc<DomainRegistry>,
    aliases: DomainAliases,
    metrics: RouterMetrics,
    /// Minimum keyword hit count `KeywordMatch` requires before committing
    /// to a domain on score alone (spec §4.6 "e.g. ≥2 hits"); a single
    /// *strong* hit (the domain's first declared keyword) always commits
    /// regardless of this threshold. Overridable via
    /// [`crate::EngineConfig::router_keyword_hit_threshold`].
    keyword_hit_threshold: usize,
}

/// A token counts toward a keyword's score on an exact match, or on a
/// near-miss typo (e.g. "subscription" vs "subscribtion") tolerated via
/// Jaro-Winkler similarity. Keeps `KeywordMatch` from missing an obvious
/// hit over a single transposed or dropped letter.
fn token_matches_keyword(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    if token.len() < 4 || keyword.len() < 4 {
        return false;
    }
    strsim::jaro_winkler(token, keyword) >= 0.88
}

fn explicit_switch_regex() -> Regex {
    Regex::new(r"(?i)switch\s+to\s+([a-z0-9 _-]+?)(?:\s+domain)?\s*$")
        .expect("static regex is valid")
}

/// Default minimum keyword hit count, per spec §4.6's illustrative "≥2
/// hits" example.
pub const DEFAULT_KEYWORD_HIT_THRESHOLD: usize = 2;

impl Router {
    pub fn new(registry: Arc<DomainRegistry>, aliases: DomainAliases) -> Self {
        Self::with_keyword_hit_threshold(registry, aliases, DEFAULT_KEYWORD_HIT_THRESHOLD)
    }

    pub fn with_keyword_hit_threshold(
        registry: Arc<DomainRegistry>,
        aliases: DomainAliases,
        keyword_hit_threshold: usize,
    ) -> Self {
        Self {
            registry,
            aliases,
            metrics: RouterMetrics::default(),
            keyword_hit_threshold,
        }
    }

    pub async fn metrics(&self) -> RouterMetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// `Route`: tries the five strategies in fixed order and returns the
    /// first that yields a registered domain.
    pub async fn route(&self, request: &RoutingRequest) -> Result<RoutingResponse, NoDomainError> {
        for strategy in [
            RoutingStrategy::ExplicitSwitch,
            RoutingStrategy::VerbAnalysis,
            RoutingStrategy::ContextInference,
            RoutingStrategy::KeywordMatch,
            RoutingStrategy::DefaultFallback,
        ] {
            let start = Instant::now();
            let outcome = self.try_strategy(strategy, request).await;
            self.metrics.for_strategy(strategy).record(start.elapsed()).await;

            if let Some((domain, rationale)) = outcome {
                *self.metrics.last_chosen_domain.lock().await = Some(domain.clone());
                debug!(domain = %domain, strategy = ?strategy, "routed request");
                return Ok(RoutingResponse {
                    domain,
                    strategy,
                    confidence: strategy.confidence(),
                    rationale,
                });
            }
        }
        Err(NoDomainError)
    }

    async fn try_strategy(
        &self,
        strategy: RoutingStrategy,
        request: &RoutingRequest,
    ) -> Option<(String, String)> {
        match strategy {
            RoutingStrategy::ExplicitSwitch => self.explicit_switch(request).await,
            RoutingStrategy::VerbAnalysis => self.verb_analysis(request).await,
            RoutingStrategy::ContextInference => self.context_inference(request).await,
            RoutingStrategy::KeywordMatch => self.keyword_match(request).await,
            RoutingStrategy::DefaultFallback => self.default_fallback(request).await,
        }
    }

    async fn explicit_switch(&self, request: &RoutingRequest) -> Option<(String, String)> {
        let caps = explicit_switch_regex().captures(request.message.trim())?;
        let raw = caps.get(1)?.as_str().trim();
        let candidate = self.aliases.resolve(raw);
        if self.registry.get(&candidate).await.is_some() {
            Some((
                candidate.clone(),
                format!("message explicitly requested switching to `{candidate}`"),
            ))
        } else {
            None
        }
    }

    async fn verb_analysis(&self, request: &RoutingRequest) -> Option<(String, String)> {
        let text = request
            .context
            .get("existing_dsl")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&request.message);

        let ast = crate::parser::parse(text).ok()?;
        let verbs = ast.extract_verbs();
        if verbs.is_empty() {
            return None;
        }

        // Prefer the domain owning the *last* verb (temporal recency) when
        // verbs from multiple domains co-occur.
        for verb in verbs.iter().rev() {
            if let Some(domain) = self.registry.find_by_verb(verb).await {
                return Some((
                    domain.name().to_string(),
                    format!("verb `{verb}` is owned by this domain"),
                ));
            }
        }
        None
    }

    async fn context_inference(&self, request: &RoutingRequest) -> Option<(String, String)> {
        if request.context.is_empty() {
            return None;
        }
        for domain in self.registry.list().await {
            for indicator in domain.context_indicators() {
                if request.context.contains_key(*indicator) {
                    return Some((
                        domain.name().to_string(),
                        format!("context carries `{indicator}`, a known indicator for this domain"),
                    ));
                }
            }
        }
        None
    }

    async fn keyword_match(&self, request: &RoutingRequest) -> Option<(String, String)> {
        if request.message.trim().is_empty() {
            return None;
        }
        let tokens: Vec<String> = request
            .message
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<(String, usize, bool)> = None;
        for domain in self.registry.list().await {
            let keywords = domain.keywords();
            if keywords.is_empty() {
                continue;
            }
            let hits = keywords
                .iter()
                .filter(|kw| tokens.iter().any(|t| token_matches_keyword(t, kw)))
                .count();
            let strong_hit = keywords
                .first()
                .map(|kw| tokens.iter().any(|t| token_matches_keyword(t, kw)))
                .unwrap_or(false);
            if hits == 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, best_hits, _)) => hits > *best_hits,
            };
            if better {
                best = Some((domain.name().to_string(), hits, strong_hit));
            }
        }

        best.and_then(|(name, hits, strong_hit)| {
            if hits >= self.keyword_hit_threshold || strong_hit {
                Some((name.clone(), format!("keyword score {hits} for domain `{name}`")))
            } else {
                None
            }
        })
    }

    async fn default_fallback(&self, request: &RoutingRequest) -> Option<(String, String)> {
        if let Some(current) = &request.current_domain {
            if self.registry.get(current).await.is_some() {
                return Some((
                    current.clone(),
                    "no other strategy matched; falling back to the current domain".to_string(),
                ));
            }
        }
        let first = self.registry.list().await.into_iter().next()?;
        Some((
            first.name().to_string(),
            "no other strategy matched; falling back to the first registered domain".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::hedge_fund::HedgeFundDomain;
    use crate::domains::onboarding::OnboardingDomain;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    async fn router_with_both_domains() -> Router {
        let registry = DomainRegistry::new(StdDuration::from_secs(30));
        registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap();
        registry
            .register(Arc::new(HedgeFundDomain::new()))
            .await
            .unwrap();
        let aliases = DomainAliases::new().with("hf", "hedge-fund-investor");
        Router::new(registry, aliases)
    }

    #[tokio::test]
    async fn explicit_switch_overrides_context() {
        let router = router_with_both_domains().await;
        let mut context = Context::new();
        context.insert("investor_id".to_string(), json!("u-1"));
        let request = RoutingRequest {
            message: "switch to onboarding".to_string(),
            session_id: None,
            current_domain: None,
            context,
        };
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.domain, "onboarding");
        assert_eq!(response.strategy, RoutingStrategy::ExplicitSwitch);
        assert_eq!(response.confidence, 1.0);
    }

    #[tokio::test]
    async fn context_inference_routes_to_hedge_fund() {
        let router = router_with_both_domains().await;
        let mut context = Context::new();
        context.insert("investor_id".to_string(), json!("u-1"));
        let request = RoutingRequest {
            message: String::new(),
            session_id: None,
            current_domain: None,
            context,
        };
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.domain, "hedge-fund-investor");
        assert_eq!(response.strategy, RoutingStrategy::ContextInference);
        assert!((response.confidence - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn verb_analysis_routes_by_owned_verb() {
        let router = router_with_both_domains().await;
        let request = RoutingRequest {
            message: r#"(case.create :id "CBU-1234")"#.to_string(),
            session_id: None,
            current_domain: None,
            context: Context::new(),
        };
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.domain, "onboarding");
        assert_eq!(response.strategy, RoutingStrategy::VerbAnalysis);
    }

    #[tokio::test]
    async fn routing_is_deterministic() {
        let router = router_with_both_domains().await;
        let request = RoutingRequest {
            message: r#"(subscribe.request :investor "u-1" :amount 1000000.00)"#.to_string(),
            session_id: None,
            current_domain: None,
            context: Context::new(),
        };
        let first = router.route(&request).await.unwrap();
        let second = router.route(&request).await.unwrap();
        assert_eq!(first.domain, second.domain);
        assert_eq!(first.strategy, second.strategy);
    }

    #[tokio::test]
    async fn default_fallback_used_when_nothing_else_matches() {
        let router = router_with_both_domains().await;
        let request = RoutingRequest {
            message: "good morning".to_string(),
            session_id: None,
            current_domain: Some("hedge-fund-investor".to_string()),
            context: Context::new(),
        };
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.domain, "hedge-fund-investor");
        assert_eq!(response.strategy, RoutingStrategy::DefaultFallback);
    }

    #[tokio::test]
    async fn keyword_match_tolerates_a_near_miss_typo() {
        let router = router_with_both_domains().await;
        let request = RoutingRequest {
            message: "please process this redemtion for the fund".to_string(),
            session_id: None,
            current_domain: None,
            context: Context::new(),
        };
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.domain, "hedge-fund-investor");
        assert_eq!(response.strategy, RoutingStrategy::KeywordMatch);
    }

    #[tokio::test]
    async fn keyword_hit_threshold_is_configurable() {
        let registry = DomainRegistry::new(StdDuration::from_secs(30));
        registry
            .register(Arc::new(HedgeFundDomain::new()))
            .await
            .unwrap();
        // A single non-strong-hit keyword ("nav") doesn't clear the
        // default threshold of 2, but does clear a threshold of 1.
        let message = "what's the nav today".to_string();

        let default_router = Router::new(registry.clone(), DomainAliases::new());
        let request = RoutingRequest {
            message: message.clone(),
            session_id: None,
            current_domain: None,
            context: Context::new(),
        };
        let response = default_router.route(&request).await.unwrap();
        assert_eq!(response.strategy, RoutingStrategy::DefaultFallback);

        let lenient_router =
            Router::with_keyword_hit_threshold(registry, DomainAliases::new(), 1);
        let response = lenient_router.route(&request).await.unwrap();
        assert_eq!(response.domain, "hedge-fund-investor");
        assert_eq!(response.strategy, RoutingStrategy::KeywordMatch);
    }

    #[tokio::test]
    async fn no_domain_error_on_empty_registry() {
        let registry = DomainRegistry::new(StdDuration::from_secs(30));
        let router = Router::new(registry, DomainAliases::new());
        let request = RoutingRequest {
            message: String::new(),
            session_id: None,
            current_domain: None,
            context: Context::new(),
        };
        assert!(router.route(&request).await.is_err());
    }
}
