//! Tier 1 record types.
//!
//! Defines [`Role`], [`ConversationTurn`] (a single utterance with extracted
//! entity references and non-owning Tier 2 links), and [`Conversation`] (an
//! ordered group of turns evicted wholesale).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A single conversation turn.
///
/// Immutable after creation except for [`linked_pattern_ids`], which may be
/// appended post-hoc when a Tier 2 pattern is applied during the turn.
///
/// [`linked_pattern_ids`]: ConversationTurn::linked_pattern_ids
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Owning conversation.
    pub conversation_id: String,
    pub role: Role,
    /// The full text content of the turn.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Extracted references: file paths, symbol names, free-form tags.
    pub entities: BTreeSet<String>,
    /// Ordered Tier 2 pattern ids applied during this turn (non-owning).
    pub linked_pattern_ids: Vec<String>,
}

/// Input for [`WorkingMemoryStore::append`].
///
/// [`WorkingMemoryStore::append`]: crate::working::WorkingMemoryStore::append
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    pub entities: BTreeSet<String>,
}

impl NewTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            entities: BTreeSet::new(),
        }
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }
}

/// An ordered group of turns sharing one id. Evicted wholesale (FIFO by start
/// time) so any held conversation id stays either fully present or fully gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the conversation is active.
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub turns: Vec<ConversationTurn>,
}

/// Header view of a conversation, without its turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub turn_count: usize,
}

impl Conversation {
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            active: self.active,
            turn_count: self.turns.len(),
        }
    }
}

/// Response from `get_context`: the conversation header, its most recent
/// turns (bounded by the configured context window), and the union of their
/// entity references.
#[derive(Debug, Clone, Serialize)]
pub struct TurnContext {
    pub current: ConversationSummary,
    /// Most recent turns, oldest first, at most the configured window.
    pub prior_turns: Vec<ConversationTurn>,
    pub related_entities: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_roundtrip() {
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert_eq!(Role::from_str("assistant").unwrap(), Role::Assistant);
        assert!(Role::from_str("system").is_err());
    }

    #[test]
    fn new_turn_builder() {
        let turn = NewTurn::new(Role::User, "fix the parser")
            .with_entities(["src/parser.rs", "Parser::parse"]);
        assert_eq!(turn.entities.len(), 2);
        assert!(turn.entities.contains("src/parser.rs"));
    }
}
