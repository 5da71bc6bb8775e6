//! Tier 2 — knowledge graph of learned patterns and relationships.

pub mod maintenance;
pub mod relations;
pub mod search;
pub mod store;
pub mod types;

pub use maintenance::{spawn_sweeper, DecayOutcome};
pub use relations::RelationshipReceipt;
pub use search::{PatternFilter, RankedPattern};
pub use store::{BoostResult, GraphStats, KnowledgeGraphStore, StorePatternResult};
pub use types::{NewPattern, Pattern, Relationship};
