//! Tier 3 — short-TTL cache of externally computed repository signals.

pub mod cache;

pub use cache::{SignalCache, SignalSnapshot, SignalStats};
