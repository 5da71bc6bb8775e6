//! Advisory per-tier health assessment.
//!
//! Three sub-scores on a 0–10 scale — staleness (age of the last successful
//! write against a per-tier freshness target), coverage (item counts against
//! configured minimums), and performance (EWMA of observed query latency
//! against a per-tier target) — combine into an overall score and a coarse
//! status. Assessment never blocks reads or writes; it produces a report for
//! the orchestrator to embed and for operational alerting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::QualityConfig;
use crate::tier::Tier;

/// EWMA smoothing for latency observations.
const LATENCY_ALPHA: f64 = 0.3;

/// Coarse health status derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.5 {
            Self::Excellent
        } else if score >= 7.0 {
            Self::Good
        } else if score >= 5.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health snapshot for one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierQuality {
    pub tier: Tier,
    pub staleness_score: f64,
    pub coverage_score: f64,
    pub performance_score: f64,
    pub overall_score: f64,
    pub status: HealthStatus,
}

/// Observable state of a tier, assembled from its store's statistics.
#[derive(Debug, Clone, Default)]
pub struct TierState {
    pub item_count: u64,
    pub last_write: Option<DateTime<Utc>>,
}

pub struct QualityMonitor {
    config: QualityConfig,
    /// EWMA query latency per tier, in milliseconds.
    latencies: RwLock<BTreeMap<Tier, f64>>,
}

impl QualityMonitor {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            latencies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Fold one observed query latency into the tier's EWMA.
    pub fn record_latency(&self, tier: Tier, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut latencies = self.latencies.write().expect("latency lock poisoned");
        let ewma = latencies
            .get(&tier)
            .map(|prev| prev + LATENCY_ALPHA * (ms - prev))
            .unwrap_or(ms);
        latencies.insert(tier, ewma);
    }

    pub fn observed_latency_ms(&self, tier: Tier) -> Option<f64> {
        self.latencies
            .read()
            .expect("latency lock poisoned")
            .get(&tier)
            .copied()
    }

    pub fn assess(&self, tier: Tier, state: &TierState) -> TierQuality {
        self.assess_at(tier, state, Utc::now())
    }

    /// Clock-explicit assessment.
    pub fn assess_at(&self, tier: Tier, state: &TierState, now: DateTime<Utc>) -> TierQuality {
        let (freshness_secs, latency_target_ms, min_count) = self.targets(tier);

        let staleness_score = staleness(state.last_write, now, freshness_secs);
        let coverage_score = coverage(state.item_count, min_count);
        let performance_score = performance(self.observed_latency_ms(tier), latency_target_ms);

        let weight_sum = self.config.staleness_weight
            + self.config.coverage_weight
            + self.config.performance_weight;
        let overall_score = if weight_sum > 0.0 {
            (self.config.staleness_weight * staleness_score
                + self.config.coverage_weight * coverage_score
                + self.config.performance_weight * performance_score)
                / weight_sum
        } else {
            0.0
        };

        TierQuality {
            tier,
            staleness_score,
            coverage_score,
            performance_score,
            overall_score,
            status: HealthStatus::from_score(overall_score),
        }
    }

    fn targets(&self, tier: Tier) -> (u64, u64, u64) {
        match tier {
            Tier::WorkingMemory => (
                self.config.tier1_freshness_secs,
                self.config.tier1_latency_target_ms,
                self.config.tier1_min_conversations,
            ),
            Tier::KnowledgeGraph => (
                self.config.tier2_freshness_secs,
                self.config.tier2_latency_target_ms,
                self.config.tier2_min_patterns,
            ),
            Tier::Signals => (
                self.config.tier3_freshness_secs,
                self.config.tier3_latency_target_ms,
                self.config.tier3_min_signals,
            ),
        }
    }
}

/// 10 while the last write is within the target age, linearly down to 0 at
/// twice the target. A tier that was never written scores 0.
fn staleness(last_write: Option<DateTime<Utc>>, now: DateTime<Utc>, target_secs: u64) -> f64 {
    let Some(last) = last_write else {
        return 0.0;
    };
    let age = (now - last).num_seconds().max(0) as f64;
    let target = target_secs.max(1) as f64;
    if age <= target {
        10.0
    } else {
        (10.0 * (1.0 - (age - target) / target)).max(0.0)
    }
}

/// Linear in item count up to the configured minimum.
fn coverage(count: u64, minimum: u64) -> f64 {
    if minimum == 0 {
        return 10.0;
    }
    10.0 * (count as f64 / minimum as f64).min(1.0)
}

/// 10 at or under the latency target, 5 at twice the target, 0 at four
/// times. With no observations yet there is no evidence of degradation.
fn performance(observed_ms: Option<f64>, target_ms: u64) -> f64 {
    let Some(observed) = observed_ms else {
        return 10.0;
    };
    let ratio = observed / target_ms.max(1) as f64;
    if ratio <= 1.0 {
        10.0
    } else if ratio <= 2.0 {
        10.0 - 5.0 * (ratio - 1.0)
    } else {
        (5.0 - 2.5 * (ratio - 2.0)).max(0.0)
    }
}
