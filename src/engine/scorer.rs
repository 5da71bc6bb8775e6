//! Per-item, per-request relevance scoring.
//!
//! Scores are comparable within a tier but not across tiers; the allocator
//! normalizes the per-tier aggregates before splitting the budget. Every
//! score lands in [0, 1].

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::config::ScoringConfig;
use crate::engine::bundle::ContextRequest;
use crate::graph::types::{Pattern, Relationship};
use crate::signals::SignalSnapshot;
use crate::working::types::ConversationTurn;

/// Relevance floor applied through recency alone, so turns from the current
/// conversation keep a foothold even without term overlap.
const OVERLAP_FLOOR: f64 = 0.25;

/// Payload fields recognized as a risk/churn indicator on Tier 3 snapshots.
const CHURN_FIELDS: [&str; 4] = ["churn", "churn_score", "risk", "hotspot_score"];

pub struct RelevanceScorer {
    config: ScoringConfig,
}

impl RelevanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Lowercased alphanumeric terms of the request text and file paths.
    pub fn request_terms(&self, request: &ContextRequest) -> BTreeSet<String> {
        let mut terms = tokenize(&request.user_request);
        for file in &request.current_files {
            terms.extend(tokenize(file));
        }
        terms
    }

    /// Tier 1: term overlap against the turn's content and entities, weighted
    /// toward recent turns. This recency decay is independent from Tier 2's
    /// confidence decay.
    pub fn score_turn(
        &self,
        terms: &BTreeSet<String>,
        turn: &ConversationTurn,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut turn_terms = tokenize(&turn.content);
        for entity in &turn.entities {
            turn_terms.extend(tokenize(entity));
        }

        let overlap = if terms.is_empty() {
            0.0
        } else {
            let hits = terms.intersection(&turn_terms).count();
            hits as f64 / terms.len() as f64
        };

        let age_hours = (now - turn.timestamp).num_seconds().max(0) as f64 / 3600.0;
        let recency = 0.5_f64.powf(age_hours / self.config.recency_half_life_hours.max(0.01));

        ((OVERLAP_FLOOR + (1.0 - OVERLAP_FLOOR) * overlap) * recency).clamp(0.0, 1.0)
    }

    /// Tier 2 patterns: textual match strength blended with the pattern's
    /// own confidence (plus a small usage term). Monotonic in confidence.
    pub fn score_pattern(&self, pattern: &Pattern, match_score: f64) -> f64 {
        let usage_norm = (pattern.usage_count.min(10) as f64) / 10.0;
        (self.config.match_weight * match_score.clamp(0.0, 1.0)
            + self.config.confidence_weight * pattern.confidence
            + self.config.usage_weight * usage_norm)
            .clamp(0.0, 1.0)
    }

    /// Tier 2 relationships: edge strength, discounted when neither endpoint
    /// is among the requested files.
    pub fn score_relationship(&self, relationship: &Relationship, files: &[String]) -> f64 {
        let touches_request = files.iter().any(|f| relationship.touches(f));
        let score = if touches_request {
            relationship.strength
        } else {
            relationship.strength * 0.25
        };
        score.clamp(0.0, 1.0)
    }

    /// Tier 3: presence of the snapshot's key among the requested files (or
    /// the repository-wide "global" key), raised by any churn-like field the
    /// opaque payload carries — a known-risky file is worth surfacing
    /// proactively.
    pub fn score_signal(&self, snapshot: &SignalSnapshot, files: &[String]) -> f64 {
        let base = if snapshot.key == "global" {
            0.4
        } else if files.iter().any(|f| f == &snapshot.key) {
            0.6
        } else {
            return 0.0;
        };

        let churn = CHURN_FIELDS
            .iter()
            .filter_map(|field| snapshot.payload.get(field))
            .filter_map(|v| v.as_f64())
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0);

        (base + 0.4 * churn).clamp(0.0, 1.0)
    }

    /// Per-tier aggregate relevance: mean of the top-K item scores.
    pub fn aggregate(&self, scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let k = self.config.aggregate_top_k.max(1).min(sorted.len());
        sorted[..k].iter().sum::<f64>() / k as f64
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrataConfig;
    use crate::working::types::Role;
    use chrono::Duration;
    use serde_json::json;

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(StrataConfig::default().scoring)
    }

    fn turn(content: &str, entities: &[&str], age_hours: i64) -> ConversationTurn {
        ConversationTurn {
            id: "t1".into(),
            conversation_id: "c1".into(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now() - Duration::hours(age_hours),
            entities: entities.iter().map(|s| s.to_string()).collect(),
            linked_pattern_ids: Vec::new(),
        }
    }

    fn snapshot(key: &str, payload: serde_json::Value) -> SignalSnapshot {
        SignalSnapshot {
            key: key.into(),
            payload,
            computed_at: Utc::now(),
            ttl_seconds: 300,
        }
    }

    #[test]
    fn turn_overlap_beats_no_overlap() {
        let scorer = scorer();
        let request = ContextRequest::new("fix the parser error", 500);
        let terms = scorer.request_terms(&request);
        let now = Utc::now();

        let relevant = scorer.score_turn(&terms, &turn("the parser error is here", &[], 0), now);
        let unrelated = scorer.score_turn(&terms, &turn("unrelated chatter", &[], 0), now);
        assert!(relevant > unrelated);
        assert!(unrelated > 0.0); // recency floor keeps fresh turns alive
    }

    #[test]
    fn turn_entities_count_as_overlap() {
        let scorer = scorer();
        let request = ContextRequest::new("budget", 500).with_files(["src/budget.rs"]);
        let terms = scorer.request_terms(&request);
        let now = Utc::now();

        let with_entity = scorer.score_turn(&terms, &turn("done", &["src/budget.rs"], 0), now);
        let without = scorer.score_turn(&terms, &turn("done", &[], 0), now);
        assert!(with_entity > without);
    }

    #[test]
    fn recency_decay_halves_per_half_life() {
        let scorer = scorer(); // 24h half-life
        let request = ContextRequest::new("parser", 500);
        let terms = scorer.request_terms(&request);
        let now = Utc::now();

        let fresh = scorer.score_turn(&terms, &turn("parser", &[], 0), now);
        let day_old = scorer.score_turn(&terms, &turn("parser", &[], 24), now);
        assert!((day_old - fresh / 2.0).abs() < 0.01);
    }

    #[test]
    fn pattern_score_is_monotonic_in_confidence() {
        let scorer = scorer();
        let mut low = Pattern {
            id: "p1".into(),
            title: "t".into(),
            category: "c".into(),
            confidence: 0.3,
            context: json!({}),
            usage_count: 2,
            created_at: String::new(),
            last_used_at: String::new(),
            applied_in_conversation_ids: Vec::new(),
        };
        let mut high = low.clone();
        high.confidence = 0.9;

        assert!(scorer.score_pattern(&high, 0.5) > scorer.score_pattern(&low, 0.5));

        // Usage contributes but saturates at 10 reuses.
        low.usage_count = 10;
        high.usage_count = 100;
        high.confidence = 0.3;
        assert!(
            (scorer.score_pattern(&high, 0.5) - scorer.score_pattern(&low, 0.5)).abs() < 1e-9
        );
    }

    #[test]
    fn relationship_discounted_off_request() {
        let scorer = scorer();
        let rel = Relationship {
            id: "r".into(),
            subject: "src/a.rs".into(),
            object: "src/b.rs".into(),
            relationship_type: "co_changed".into(),
            strength: 0.8,
            observation_count: 4,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let on = scorer.score_relationship(&rel, &["src/a.rs".into()]);
        let off = scorer.score_relationship(&rel, &["src/z.rs".into()]);
        assert!((on - 0.8).abs() < 1e-9);
        assert!((off - 0.2).abs() < 1e-9);
    }

    #[test]
    fn signal_requires_presence_and_rewards_churn() {
        let scorer = scorer();
        let files = vec!["src/hot.rs".to_string()];

        let absent = scorer.score_signal(&snapshot("src/cold.rs", json!({})), &files);
        assert_eq!(absent, 0.0);

        let calm = scorer.score_signal(&snapshot("src/hot.rs", json!({})), &files);
        let churny =
            scorer.score_signal(&snapshot("src/hot.rs", json!({"churn": 0.9})), &files);
        assert!(churny > calm);
        assert!(churny <= 1.0);

        let global = scorer.score_signal(&snapshot("global", json!({"risk": 0.5})), &files);
        assert!(global > 0.0);
    }

    #[test]
    fn aggregate_is_top_k_mean() {
        let scorer = scorer(); // top-3
        assert_eq!(scorer.aggregate(&[]), 0.0);
        let agg = scorer.aggregate(&[0.9, 0.1, 0.8, 0.7, 0.2]);
        assert!((agg - (0.9 + 0.8 + 0.7) / 3.0).abs() < 1e-9);
    }
}
