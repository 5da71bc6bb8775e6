//! The three memory tiers.

use serde::{Deserialize, Serialize};

/// Discriminant for the three independent memory stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Tier 1 — bounded FIFO cache of recent conversation turns.
    WorkingMemory,
    /// Tier 2 — learned patterns and relationships with confidence decay.
    KnowledgeGraph,
    /// Tier 3 — short-TTL cache of externally computed repository signals.
    Signals,
}

impl Tier {
    /// All tiers in fan-out order.
    pub const ALL: [Tier; 3] = [Tier::WorkingMemory, Tier::KnowledgeGraph, Tier::Signals];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkingMemory => "working_memory",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::Signals => "signals",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working_memory" => Ok(Self::WorkingMemory),
            "knowledge_graph" => Ok(Self::KnowledgeGraph),
            "signals" => Ok(Self::Signals),
            _ => Err(format!("unknown tier: {s}")),
        }
    }
}
