//! Error taxonomy for the context engine.
//!
//! Only [`EngineError::Validation`] is a hard failure of a whole request.
//! Everything else degrades: the orchestrator downgrades tier failures to
//! per-tier warnings, stale signals are ordinary cache misses, and budget
//! truncation is recorded in the budget report rather than raised.

use crate::tier::Tier;
use thiserror::Error;

/// Errors produced by the stores and the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input — empty content, out-of-range confidence, non-positive
    /// budget, unknown ids. Surfaced to the caller, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A tier store timed out or raised during fan-out. Caught by the
    /// orchestrator and recorded as a warning; the request proceeds with the
    /// remaining tiers.
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: Tier, reason: String },

    /// Underlying SQLite failure from the knowledge graph store.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    /// Shorthand used throughout the stores for input validation.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// `true` if this error must propagate as a hard request failure.
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_is_hard() {
        assert!(EngineError::validation("empty content").is_hard());
    }

    #[test]
    fn tier_unavailable_is_soft() {
        let err = EngineError::TierUnavailable {
            tier: Tier::Signals,
            reason: "timed out after 250ms".into(),
        };
        assert!(!err.is_hard());
        assert!(err.to_string().contains("signals"));
    }

    #[test]
    fn storage_wraps_rusqlite() {
        let err = EngineError::from(rusqlite::Error::InvalidQuery);
        assert!(!err.is_hard());
        assert!(err.to_string().starts_with("storage error"));
    }
}
