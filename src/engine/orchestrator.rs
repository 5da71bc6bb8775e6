//! Request orchestration across the three tiers.
//!
//! Per request: `INIT → FANOUT → SCORE → ALLOCATE → MERGE_DEDUPE → ANNOTATE
//! → CACHE → RETURN`. Tier queries run concurrently, each under its own
//! timeout; a failing or slow tier degrades to an empty contribution with a
//! recorded warning and never aborts the others. Only input validation (a
//! zero token budget) fails the whole request.
//!
//! Composite bundles are cached briefly, keyed on the full request
//! fingerprint plus each store's version counter — any store write
//! invalidates, and a materially different request never hits.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::config::{OrchestratorConfig, StrataConfig};
use crate::engine::budget;
use crate::engine::bundle::{
    BudgetReport, ContextBundle, ContextItem, ContextRequest, QualityReport, ScoredItem,
    TierBudget,
};
use crate::engine::quality::{QualityMonitor, TierState};
use crate::engine::scorer::RelevanceScorer;
use crate::engine::token;
use crate::error::{EngineError, Result};
use crate::graph::search::PatternFilter;
use crate::graph::KnowledgeGraphStore;
use crate::signals::SignalCache;
use crate::tier::Tier;
use crate::working::{TurnFilter, WorkingMemoryStore};

/// Edges weaker than this are not worth surfacing.
const MIN_EDGE_STRENGTH: f64 = 0.05;
/// Edges at or above this strength produce a coupled-change warning.
const COUPLING_WARN_STRENGTH: f64 = 0.7;

/// One tier's raw contribution before scoring.
struct TierQueryOutput {
    items: Vec<ContextItem>,
    warnings: Vec<String>,
}

struct CachedBundle {
    bundle: ContextBundle,
    cached_at: DateTime<Utc>,
}

pub struct ContextOrchestrator {
    working: Arc<WorkingMemoryStore>,
    graph: Arc<KnowledgeGraphStore>,
    signals: Arc<SignalCache>,
    scorer: RelevanceScorer,
    quality: QualityMonitor,
    config: OrchestratorConfig,
    bundle_cache: Mutex<HashMap<String, CachedBundle>>,
}

impl ContextOrchestrator {
    pub fn new(
        working: Arc<WorkingMemoryStore>,
        graph: Arc<KnowledgeGraphStore>,
        signals: Arc<SignalCache>,
        config: &StrataConfig,
    ) -> Self {
        Self {
            working,
            graph,
            signals,
            scorer: RelevanceScorer::new(config.scoring.clone()),
            quality: QualityMonitor::new(config.quality.clone()),
            config: config.orchestrator.clone(),
            bundle_cache: Mutex::new(HashMap::new()),
        }
    }

    /// The monitor collecting latency observations across requests.
    pub fn quality(&self) -> &QualityMonitor {
        &self.quality
    }

    /// Assemble a context bundle for one request.
    pub async fn assemble(&self, request: ContextRequest) -> Result<ContextBundle> {
        if request.total_token_budget == 0 {
            return Err(EngineError::validation("token budget must be positive"));
        }

        let cache_key = self.cache_key(&request);
        if let Some(bundle) = self.lookup_cached(&cache_key) {
            tracing::debug!("serving composite bundle from cache");
            return Ok(bundle);
        }

        let now = Utc::now();
        let limit = self.config.max_candidates_per_tier.max(1);
        let mut warnings: Vec<String> = Vec::new();

        // ── FANOUT ───────────────────────────────────────────────────────
        let t1 = {
            let store = self.working.clone();
            let req = request.clone();
            run_tier(
                Tier::WorkingMemory,
                Duration::from_millis(self.config.tier1_timeout_ms),
                move || query_working(&store, &req, limit),
            )
        };
        let t2 = {
            let store = self.graph.clone();
            let req = request.clone();
            run_tier(
                Tier::KnowledgeGraph,
                Duration::from_millis(self.config.tier2_timeout_ms),
                move || query_graph(&store, &req, limit),
            )
        };
        let t3 = {
            let cache = self.signals.clone();
            let req = request.clone();
            run_tier(
                Tier::Signals,
                Duration::from_millis(self.config.tier3_timeout_ms),
                move || query_signals(&cache, &req, now),
            )
        };
        let (r1, r2, r3) = tokio::join!(t1, t2, t3);

        let mut tier_items: BTreeMap<Tier, Vec<ContextItem>> = BTreeMap::new();
        for (tier, (outcome, latency)) in [
            (Tier::WorkingMemory, r1),
            (Tier::KnowledgeGraph, r2),
            (Tier::Signals, r3),
        ] {
            if let Some(elapsed) = latency {
                self.quality.record_latency(tier, elapsed);
            }
            match outcome {
                Ok(output) => {
                    warnings.extend(output.warnings);
                    tier_items.insert(tier, output.items);
                }
                Err(err) => {
                    tracing::warn!(%tier, %err, "tier degraded to empty contribution");
                    warnings.push(err.to_string());
                    tier_items.insert(tier, Vec::new());
                }
            }
        }

        // ── SCORE ────────────────────────────────────────────────────────
        let terms = self.scorer.request_terms(&request);
        let mut scored: BTreeMap<Tier, Vec<ScoredItem>> = BTreeMap::new();
        let mut aggregates: BTreeMap<Tier, f64> = BTreeMap::new();

        for (tier, items) in tier_items {
            let mut tier_scored: Vec<ScoredItem> = items
                .into_iter()
                .map(|item| {
                    let relevance = match &item {
                        ContextItem::Turn { turn } => self.scorer.score_turn(&terms, turn, now),
                        ContextItem::Pattern {
                            pattern,
                            match_score,
                        } => self.scorer.score_pattern(pattern, *match_score),
                        ContextItem::Relation { relationship } => self
                            .scorer
                            .score_relationship(relationship, &request.current_files),
                        ContextItem::Signal { snapshot } => {
                            self.scorer.score_signal(snapshot, &request.current_files)
                        }
                    };
                    let token_cost = token::estimate_item_tokens(&item.render_text());
                    ScoredItem {
                        source_tier: tier,
                        relevance_score: relevance,
                        token_cost,
                        item,
                    }
                })
                .collect();
            tier_scored.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let scores: Vec<f64> = tier_scored.iter().map(|i| i.relevance_score).collect();
            aggregates.insert(tier, self.scorer.aggregate(&scores));
            scored.insert(tier, tier_scored);
        }

        // ── ALLOCATE + per-tier truncation ───────────────────────────────
        let budgets = budget::allocate(request.total_token_budget, &aggregates)?;

        let mut kept: BTreeMap<Tier, Vec<ScoredItem>> = BTreeMap::new();
        let mut usage: BTreeMap<Tier, usize> = BTreeMap::new();
        let mut tier_budgets: Vec<TierBudget> = Vec::new();
        let mut budget_warnings: Vec<String> = Vec::new();

        for tier in Tier::ALL {
            let allocated = budgets.get(&tier).copied().unwrap_or(0);
            let items = scored.remove(&tier).unwrap_or_default();
            let outcome = budget::truncate(items, allocated, tier);
            let used: usize = outcome.kept.iter().map(|i| i.token_cost).sum();

            tier_budgets.push(TierBudget {
                tier,
                relevance: aggregates.get(&tier).copied().unwrap_or(0.0),
                allocated_tokens: allocated,
                used_tokens: used,
                items_kept: outcome.kept.len(),
                items_dropped: outcome.dropped.len(),
                tokens_dropped: outcome.tokens_dropped,
            });
            budget_warnings.extend(outcome.warnings);
            usage.insert(tier, used);
            kept.insert(tier, outcome.kept);
        }

        let compliance = budget::check_compliance(&usage, &budgets);

        // ── ANNOTATE ─────────────────────────────────────────────────────
        let quality_report = QualityReport {
            tiers: Tier::ALL
                .iter()
                .map(|tier| {
                    let state = self.tier_state(*tier, &mut warnings);
                    self.quality.assess_at(*tier, &state, now)
                })
                .collect(),
        };

        let bundle = ContextBundle {
            tier1_items: kept.remove(&Tier::WorkingMemory).unwrap_or_default(),
            tier2_items: kept.remove(&Tier::KnowledgeGraph).unwrap_or_default(),
            tier3_items: kept.remove(&Tier::Signals).unwrap_or_default(),
            budget_report: BudgetReport {
                total_budget: request.total_token_budget,
                tiers: tier_budgets,
                compliant: compliance.compliant,
                warnings: budget_warnings,
            },
            quality_report,
            warnings,
            generated_at: now,
        };

        // ── CACHE ────────────────────────────────────────────────────────
        self.store_cached(cache_key, bundle.clone());

        tracing::debug!(
            items = bundle.item_count(),
            warnings = bundle.warnings.len(),
            "assembled context bundle"
        );
        Ok(bundle)
    }

    /// Spawn the optional periodic health reporter: assesses every tier and
    /// logs the result for operational alerting. Best-effort — it never
    /// blocks store traffic and is safe to skip or run concurrently.
    pub fn spawn_quality_reporter(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut warnings = Vec::new();
                for tier in Tier::ALL {
                    let state = orchestrator.tier_state(tier, &mut warnings);
                    let quality = orchestrator.quality.assess(tier, &state);
                    tracing::info!(
                        %tier,
                        overall = quality.overall_score,
                        status = %quality.status,
                        "tier health"
                    );
                }
                for warning in warnings {
                    tracing::warn!(%warning, "health probe degraded");
                }
            }
        })
    }

    /// Observable state of one tier for quality assessment. A store that
    /// cannot report stats degrades to an empty state with a warning.
    fn tier_state(&self, tier: Tier, warnings: &mut Vec<String>) -> TierState {
        match tier {
            Tier::WorkingMemory => {
                let stats = self.working.stats();
                TierState {
                    item_count: stats.conversations,
                    last_write: stats.last_write,
                }
            }
            Tier::KnowledgeGraph => match self.graph.stats() {
                Ok(stats) => TierState {
                    item_count: stats.patterns,
                    last_write: stats.last_write.as_deref().and_then(parse_rfc3339),
                },
                Err(err) => {
                    warnings.push(format!("{tier}: stats unavailable: {err}"));
                    TierState::default()
                }
            },
            Tier::Signals => {
                let stats = self.signals.stats();
                TierState {
                    item_count: stats.entries,
                    last_write: stats.last_write,
                }
            }
        }
    }

    fn cache_key(&self, request: &ContextRequest) -> String {
        format!(
            "{}\u{1f}v{}:{}:{}",
            request.fingerprint(),
            self.working.version(),
            self.graph.version(),
            self.signals.version(),
        )
    }

    fn lookup_cached(&self, key: &str) -> Option<ContextBundle> {
        let ttl = chrono::Duration::seconds(self.config.bundle_ttl_seconds as i64);
        let cache = self.bundle_cache.lock().expect("bundle cache lock poisoned");
        cache
            .get(key)
            .filter(|c| Utc::now() - c.cached_at <= ttl)
            .map(|c| c.bundle.clone())
    }

    fn store_cached(&self, key: String, bundle: ContextBundle) {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.bundle_ttl_seconds as i64);
        let mut cache = self.bundle_cache.lock().expect("bundle cache lock poisoned");

        cache.retain(|_, c| now - c.cached_at <= ttl);
        while cache.len() >= self.config.bundle_cache_entries.max(1) {
            let oldest = cache
                .iter()
                .min_by_key(|(_, c)| c.cached_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    cache.remove(&k);
                }
                None => break,
            }
        }

        cache.insert(key, CachedBundle {
            bundle,
            cached_at: now,
        });
    }
}

/// Run one tier query on the blocking pool under its timeout. Returns the
/// outcome and the observed latency (absent on timeout/failure).
///
/// Cancellation is cooperative at the task boundary: dropping the assemble
/// future abandons the await, and an already-running blocking query finishes
/// on its own without affecting other requests.
async fn run_tier<F>(
    tier: Tier,
    limit: Duration,
    query: F,
) -> (Result<TierQueryOutput>, Option<Duration>)
where
    F: FnOnce() -> Result<TierQueryOutput> + Send + 'static,
{
    let started = Instant::now();
    let handle = tokio::task::spawn_blocking(query);
    match timeout(limit, handle).await {
        Ok(Ok(outcome)) => (outcome, Some(started.elapsed())),
        Ok(Err(join_err)) => (
            Err(EngineError::TierUnavailable {
                tier,
                reason: format!("query task failed: {join_err}"),
            }),
            None,
        ),
        Err(_) => (
            Err(EngineError::TierUnavailable {
                tier,
                reason: format!("timed out after {limit:?}"),
            }),
            None,
        ),
    }
}

/// Tier 1 query: term search plus the requested conversation's context
/// window, deduplicated by turn id. A missing (evicted) conversation is a
/// degradation, not a request failure.
fn query_working(
    store: &WorkingMemoryStore,
    request: &ContextRequest,
    limit: usize,
) -> Result<TierQueryOutput> {
    let mut warnings = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut items: Vec<ContextItem> = Vec::new();

    if let Some(conversation_id) = &request.conversation_id {
        match store.get_context(conversation_id) {
            Ok(ctx) => {
                for turn in ctx.prior_turns {
                    if items.len() >= limit {
                        break;
                    }
                    if seen.insert(turn.id.clone()) {
                        items.push(ContextItem::Turn { turn });
                    }
                }
            }
            Err(err) => warnings.push(format!("{}: {err}", Tier::WorkingMemory)),
        }
    }

    for turn in store.search(&request.user_request, &TurnFilter::default()) {
        if items.len() >= limit {
            break;
        }
        if seen.insert(turn.id.clone()) {
            items.push(ContextItem::Turn { turn });
        }
    }

    Ok(TierQueryOutput { items, warnings })
}

/// Tier 2 query: ranked pattern search plus relationships touching the
/// requested files. Strongly coupled edges surface a warning so the caller
/// can flag risky co-changes.
fn query_graph(
    store: &KnowledgeGraphStore,
    request: &ContextRequest,
    limit: usize,
) -> Result<TierQueryOutput> {
    let mut warnings = Vec::new();
    let mut items: Vec<ContextItem> = Vec::new();

    for ranked in store.search_patterns(&request.user_request, &PatternFilter::default(), limit)? {
        items.push(ContextItem::Pattern {
            pattern: ranked.pattern,
            match_score: ranked.match_score,
        });
    }

    let mut seen_edges: HashSet<String> = HashSet::new();
    for file in &request.current_files {
        for relationship in store.get_relationships(file, &[], MIN_EDGE_STRENGTH)? {
            if !seen_edges.insert(relationship.id.clone()) {
                continue;
            }
            if relationship.strength >= COUPLING_WARN_STRENGTH {
                warnings.push(format!(
                    "coupled-change risk: {} and {} ({}, strength {:.2})",
                    relationship.subject,
                    relationship.object,
                    relationship.relationship_type,
                    relationship.strength
                ));
            }
            items.push(ContextItem::Relation { relationship });
        }
    }

    Ok(TierQueryOutput { items, warnings })
}

/// Tier 3 query: per-file lookups plus the repository-wide snapshot. A
/// stale or absent key is an ordinary miss — the external producer
/// recomputes; nothing to report here.
fn query_signals(
    cache: &SignalCache,
    request: &ContextRequest,
    now: DateTime<Utc>,
) -> Result<TierQueryOutput> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut items: Vec<ContextItem> = Vec::new();

    for key in request
        .current_files
        .iter()
        .map(String::as_str)
        .chain(std::iter::once("global"))
    {
        if !seen.insert(key) {
            continue;
        }
        if let Some(snapshot) = cache.get_at(key, now) {
            items.push(ContextItem::Signal { snapshot });
        }
    }

    Ok(TierQueryOutput {
        items,
        warnings: Vec::new(),
    })
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
