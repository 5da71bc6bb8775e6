//! Tier 2 record types.
//!
//! Defines [`Pattern`] (a learned pattern with decaying confidence),
//! [`Relationship`] (a typed edge between file-like identifiers whose
//! strength grows with co-observation), and [`NewPattern`] (validated input
//! for the write path).

use serde::{Deserialize, Serialize};

/// A learned pattern, matching the `patterns` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub title: String,
    /// Free-form classification (e.g. `"error_handling"`, `"naming"`).
    pub category: String,
    /// Confidence score in `[0.0, 1.0]`; decays with non-use, boosted by reuse.
    pub confidence: f64,
    /// Opaque structured payload — the pattern's substance.
    pub context: serde_json::Value,
    /// Number of successful reuses (bumped by `boost`).
    pub usage_count: u32,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 timestamp of the last boost; drives the decay clock.
    pub last_used_at: String,
    /// Non-owning back-references to Tier 1 conversations this pattern was
    /// applied in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied_in_conversation_ids: Vec<String>,
}

/// Input for `store_pattern`.
#[derive(Debug, Clone)]
pub struct NewPattern {
    pub title: String,
    pub category: String,
    pub confidence: f64,
    pub context: serde_json::Value,
}

impl NewPattern {
    pub fn new(title: impl Into<String>, category: impl Into<String>, confidence: f64) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
            confidence,
            context: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// A typed edge between two file-like identifiers.
///
/// Never hard-deleted: strength may decay toward zero but the edge is
/// retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// UUID v7 primary key.
    pub id: String,
    pub subject: String,
    pub object: String,
    /// Edge label (e.g. `"co_changed"`, `"imports"`, `"tested_by"`).
    pub relationship_type: String,
    /// Strength in `[0.0, 1.0]`, nudged toward 1.0 by repeated observation.
    pub strength: f64,
    pub observation_count: u32,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 timestamp of the last observation.
    pub updated_at: String,
}

impl Relationship {
    /// `true` if the given identifier participates in this edge.
    pub fn touches(&self, entity: &str) -> bool {
        self.subject == entity || self.object == entity
    }
}
