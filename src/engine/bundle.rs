//! Request and response types for the orchestrator boundary.
//!
//! [`ContextBundle`] is the per-request output: tier-separated items each
//! carrying a relevance score and token cost, plus the budget and quality
//! reports. Ephemeral — constructed per request, cached briefly, never
//! persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

use crate::engine::quality::TierQuality;
use crate::graph::types::{Pattern, Relationship};
use crate::signals::SignalSnapshot;
use crate::tier::Tier;
use crate::working::types::ConversationTurn;

/// Input to [`ContextOrchestrator::assemble`].
///
/// [`ContextOrchestrator::assemble`]: crate::engine::ContextOrchestrator::assemble
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub user_request: String,
    /// Files the assistant currently has open or is editing.
    pub current_files: Vec<String>,
    /// Hard ceiling on combined context size, in tokens.
    pub total_token_budget: usize,
    pub conversation_id: Option<String>,
}

impl ContextRequest {
    pub fn new(user_request: impl Into<String>, total_token_budget: usize) -> Self {
        Self {
            user_request: user_request.into(),
            current_files: Vec::new(),
            total_token_budget,
            conversation_id: None,
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.current_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Cache-key component covering every materially distinguishing field.
    /// Tier state versions are appended by the orchestrator.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.total_token_budget,
            self.conversation_id.as_deref().unwrap_or("-"),
            self.current_files.join(","),
            self.user_request,
        )
    }
}

/// Tier-specific payload behind a `kind` discriminant — keeps serialization
/// and budget accounting uniform without virtual dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextItem {
    Turn { turn: ConversationTurn },
    Pattern { pattern: Pattern, match_score: f64 },
    Relation { relationship: Relationship },
    Signal { snapshot: SignalSnapshot },
}

impl ContextItem {
    /// Stable identity for within-tier deduplication.
    pub fn identity(&self) -> &str {
        match self {
            Self::Turn { turn } => &turn.id,
            Self::Pattern { pattern, .. } => &pattern.id,
            Self::Relation { relationship } => &relationship.id,
            Self::Signal { snapshot } => &snapshot.key,
        }
    }

    /// Text as it would be injected downstream; priced by the token estimator.
    pub fn render_text(&self) -> String {
        match self {
            Self::Turn { turn } => format!("[{}] {}", turn.role, turn.content),
            Self::Pattern { pattern, .. } => {
                format!(
                    "{} ({}, confidence {:.2}): {}",
                    pattern.title, pattern.category, pattern.confidence, pattern.context
                )
            }
            Self::Relation { relationship } => format!(
                "{} —{}→ {} (strength {:.2}, seen {}×)",
                relationship.subject,
                relationship.relationship_type,
                relationship.object,
                relationship.strength,
                relationship.observation_count
            ),
            Self::Signal { snapshot } => {
                format!("{}: {}", snapshot.key, snapshot.payload)
            }
        }
    }
}

/// A context item with its per-request score and price.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    pub source_tier: Tier,
    /// Relevance to the current request, in [0, 1].
    pub relevance_score: f64,
    pub token_cost: usize,
    pub item: ContextItem,
}

/// Per-tier slice of the budget report.
#[derive(Debug, Clone, Serialize)]
pub struct TierBudget {
    pub tier: Tier,
    /// Aggregate relevance that drove this tier's share.
    pub relevance: f64,
    pub allocated_tokens: usize,
    pub used_tokens: usize,
    pub items_kept: usize,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
}

/// Allocation and truncation accounting for one request.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetReport {
    pub total_budget: usize,
    pub tiers: Vec<TierBudget>,
    pub compliant: bool,
    /// Truncation warnings — a drop is never silent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Per-tier health snapshot attached to the bundle.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub tiers: Vec<TierQuality>,
}

/// The orchestrator's per-request output.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub tier1_items: Vec<ScoredItem>,
    pub tier2_items: Vec<ScoredItem>,
    pub tier3_items: Vec<ScoredItem>,
    pub budget_report: BudgetReport,
    pub quality_report: QualityReport,
    /// Degradations observed while assembling (tier failures, evicted
    /// conversations, coupling risks).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ContextBundle {
    pub fn items_for(&self, tier: Tier) -> &[ScoredItem] {
        match tier {
            Tier::WorkingMemory => &self.tier1_items,
            Tier::KnowledgeGraph => &self.tier2_items,
            Tier::Signals => &self.tier3_items,
        }
    }

    pub fn item_count(&self) -> usize {
        self.tier1_items.len() + self.tier2_items.len() + self.tier3_items.len()
    }

    /// Bounded textual summary for injection or inspection. Output never
    /// exceeds `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();

        for tier in Tier::ALL {
            let items = self.items_for(tier);
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "## {tier} ({} items)", items.len());
            for scored in items {
                let _ = writeln!(
                    out,
                    "- [{:.2}] {}",
                    scored.relevance_score,
                    scored.item.render_text()
                );
            }
            out.push('\n');
        }

        let used: usize = self.budget_report.tiers.iter().map(|t| t.used_tokens).sum();
        let _ = writeln!(
            out,
            "Budget: {used}/{} tokens{}",
            self.budget_report.total_budget,
            if self.budget_report.compliant {
                ""
            } else {
                " (over budget)"
            }
        );

        for warning in &self.warnings {
            let _ = writeln!(out, "! {warning}");
        }

        truncate_chars(&out, max_chars)
    }
}

/// Truncate to at most `max_chars` characters on a char boundary, appending
/// an ellipsis marker when cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let marker = "…";
    if max_chars < marker.len() {
        return String::new();
    }
    let budget = max_chars - marker.len();
    let end = text
        .char_indices()
        .take_while(|(i, _)| *i <= budget)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(0);
    format!("{}{marker}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal_item(key: &str) -> ContextItem {
        ContextItem::Signal {
            snapshot: SignalSnapshot {
                key: key.into(),
                payload: json!({"churn": 0.9}),
                computed_at: Utc::now(),
                ttl_seconds: 300,
            },
        }
    }

    #[test]
    fn fingerprint_distinguishes_material_fields() {
        let a = ContextRequest::new("fix the bug", 500).with_files(["src/a.rs"]);
        let b = ContextRequest::new("fix the bug", 500).with_files(["src/b.rs"]);
        let c = ContextRequest::new("fix the bug", 600).with_files(["src/a.rs"]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }

    #[test]
    fn identity_follows_the_variant() {
        let item = signal_item("src/lib.rs");
        assert_eq!(item.identity(), "src/lib.rs");
    }

    #[test]
    fn serialized_items_carry_kind_tag() {
        let json = serde_json::to_value(signal_item("k")).unwrap();
        assert_eq!(json["kind"], "signal");
        assert_eq!(json["snapshot"]["key"], "k");
    }

    #[test]
    fn render_is_bounded() {
        let bundle = ContextBundle {
            tier1_items: vec![],
            tier2_items: vec![],
            tier3_items: (0..50)
                .map(|i| ScoredItem {
                    source_tier: Tier::Signals,
                    relevance_score: 0.5,
                    token_cost: 10,
                    item: signal_item(&format!("file-{i}.rs")),
                })
                .collect(),
            budget_report: BudgetReport {
                total_budget: 100,
                tiers: vec![],
                compliant: true,
                warnings: vec![],
            },
            quality_report: QualityReport { tiers: vec![] },
            warnings: vec!["one tier degraded".into()],
            generated_at: Utc::now(),
        };

        let rendered = bundle.render(400);
        assert!(rendered.len() <= 400);
        assert!(rendered.ends_with('…'));

        let full = bundle.render(1_000_000);
        assert!(full.contains("## signals"));
        assert!(full.contains("! one tier degraded"));
    }
}
