//! Token budget allocation and enforcement.
//!
//! Allocation normalizes per-tier relevance into weights, floors each share
//! to integer tokens, and hands the rounding remainder to the
//! highest-relevance tier — so the per-tier budgets always sum to the total
//! exactly. Truncation drops lowest-relevance items first and records every
//! loss; a drop is never silent.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::engine::bundle::ScoredItem;
use crate::error::{EngineError, Result};
use crate::tier::Tier;

/// Split `total_budget` across tiers proportionally to relevance.
///
/// All-zero relevance falls back to an equal split. The returned budgets sum
/// to `total_budget` exactly; a non-positive budget is a validation error.
pub fn allocate(
    total_budget: usize,
    relevance: &BTreeMap<Tier, f64>,
) -> Result<BTreeMap<Tier, usize>> {
    if total_budget == 0 {
        return Err(EngineError::validation("token budget must be positive"));
    }

    let clamped: BTreeMap<Tier, f64> = Tier::ALL
        .iter()
        .map(|tier| {
            let r = relevance.get(tier).copied().unwrap_or(0.0);
            (*tier, if r.is_finite() { r.max(0.0) } else { 0.0 })
        })
        .collect();

    let sum: f64 = clamped.values().sum();
    let weights: BTreeMap<Tier, f64> = if sum > 0.0 {
        clamped.iter().map(|(t, r)| (*t, r / sum)).collect()
    } else {
        let equal = 1.0 / Tier::ALL.len() as f64;
        Tier::ALL.iter().map(|t| (*t, equal)).collect()
    };

    let mut budgets: BTreeMap<Tier, usize> = weights
        .iter()
        .map(|(t, w)| (*t, (w * total_budget as f64).floor() as usize))
        .collect();

    // Assign the flooring remainder to the highest-relevance tier so no
    // token is lost or minted by rounding.
    let assigned: usize = budgets.values().sum();
    let remainder = total_budget - assigned;
    if remainder > 0 {
        let top = clamped
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, _)| *t)
            .unwrap_or(Tier::WorkingMemory);
        *budgets.get_mut(&top).expect("all tiers present") += remainder;
    }

    Ok(budgets)
}

/// An item dropped during truncation.
#[derive(Debug, Clone, Serialize)]
pub struct DroppedItem {
    pub identity: String,
    pub token_cost: usize,
}

/// Result of enforcing one tier's budget.
#[derive(Debug)]
pub struct TruncationOutcome {
    /// Survivors, in their original order.
    pub kept: Vec<ScoredItem>,
    pub dropped: Vec<DroppedItem>,
    pub tokens_dropped: usize,
    pub warnings: Vec<String>,
}

/// Drop lowest-relevance items until the running token cost fits `budget`.
pub fn truncate(items: Vec<ScoredItem>, budget: usize, tier: Tier) -> TruncationOutcome {
    let mut kept = items;
    let mut dropped: Vec<DroppedItem> = Vec::new();
    let mut tokens_dropped = 0usize;

    let mut total: usize = kept.iter().map(|i| i.token_cost).sum();
    while total > budget && !kept.is_empty() {
        let victim_idx = kept
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.relevance_score
                    .partial_cmp(&b.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(idx, _)| idx)
            .expect("non-empty");
        let victim = kept.remove(victim_idx);
        total -= victim.token_cost;
        tokens_dropped += victim.token_cost;
        dropped.push(DroppedItem {
            identity: victim.item.identity().to_string(),
            token_cost: victim.token_cost,
        });
    }

    let mut warnings = Vec::new();
    if !dropped.is_empty() {
        let ids: Vec<&str> = dropped.iter().map(|d| d.identity.as_str()).collect();
        let warning = format!(
            "{tier}: dropped {} item(s) ({tokens_dropped} tokens) to fit budget {budget}: {}",
            dropped.len(),
            ids.join(", ")
        );
        tracing::warn!(%tier, dropped = dropped.len(), tokens_dropped, "budget truncation");
        warnings.push(warning);
    }

    TruncationOutcome {
        kept,
        dropped,
        tokens_dropped,
        warnings,
    }
}

/// Compliance check of actual usage against allocated budgets.
#[derive(Debug, Clone, Serialize)]
pub struct Compliance {
    pub compliant: bool,
    /// Tokens over budget, per offending tier.
    pub overages: BTreeMap<Tier, usize>,
}

pub fn check_compliance(
    usage: &BTreeMap<Tier, usize>,
    budgets: &BTreeMap<Tier, usize>,
) -> Compliance {
    let mut overages = BTreeMap::new();
    for (tier, used) in usage {
        let budget = budgets.get(tier).copied().unwrap_or(0);
        if *used > budget {
            overages.insert(*tier, used - budget);
        }
    }
    Compliance {
        compliant: overages.is_empty(),
        overages,
    }
}
