//! Tier 1 — bounded FIFO cache of recent conversations.
//!
//! Capacity is counted in whole conversations, not turns: when starting a
//! conversation would exceed the bound, the oldest conversation (by start
//! time) is evicted with all its turns. Eviction is synchronous with
//! insertion; `append` itself never fails on over-capacity, only on
//! malformed input.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::config::WorkingMemoryConfig;
use crate::error::{EngineError, Result};
use crate::working::types::{Conversation, ConversationTurn, NewTurn, Role, TurnContext};

/// Result returned from an append operation.
#[derive(Debug, Clone, Serialize)]
pub struct AppendReceipt {
    /// Conversation the turn landed in.
    pub conversation_id: String,
    /// UUID of the stored turn.
    pub turn_id: String,
    /// Conversation evicted to make room, if the FIFO bound was hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted: Option<String>,
}

/// Filters for [`WorkingMemoryStore::search`].
#[derive(Debug, Clone, Default)]
pub struct TurnFilter {
    pub role: Option<Role>,
    pub conversation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Store statistics, consumed by the quality monitor and the bundle cache key.
#[derive(Debug, Clone, Serialize)]
pub struct WorkingStats {
    pub conversations: u64,
    pub turns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write: Option<DateTime<Utc>>,
}

struct Inner {
    /// Ordered by start time; front is oldest.
    conversations: VecDeque<Conversation>,
    active: Option<String>,
    last_write: Option<DateTime<Utc>>,
}

/// Tier 1 store. Cheap to share behind an `Arc`; all methods take `&self`.
pub struct WorkingMemoryStore {
    inner: RwLock<Inner>,
    capacity: usize,
    context_window: usize,
    version: AtomicU64,
}

impl WorkingMemoryStore {
    pub fn new(config: &WorkingMemoryConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                conversations: VecDeque::new(),
                active: None,
                last_write: None,
            }),
            capacity: config.capacity.max(1),
            context_window: config.context_window.max(1),
            version: AtomicU64::new(0),
        }
    }

    /// Monotonic write counter. Any mutation bumps it, which invalidates
    /// cached composite bundles keyed on it.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Start a fresh conversation, ending the currently active one.
    ///
    /// Returns the new conversation id and the id of any conversation that
    /// was evicted to stay within the FIFO bound.
    pub fn start_conversation(&self) -> (String, Option<String>) {
        let mut inner = self.inner.write().expect("working memory lock poisoned");
        let result = start_locked(&mut inner, self.capacity);
        self.bump();
        result
    }

    /// Mark a conversation as ended. Idempotent; unknown ids are rejected.
    pub fn end_conversation(&self, conversation_id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("working memory lock poisoned");
        let conv = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| EngineError::validation(format!(
                "conversation not found: {conversation_id}"
            )))?;
        if conv.active {
            conv.active = false;
            conv.ended_at = Some(Utc::now());
        }
        if inner.active.as_deref() == Some(conversation_id) {
            inner.active = None;
        }
        drop(inner);
        self.bump();
        Ok(())
    }

    /// Append a turn.
    ///
    /// With `conversation_id = None` the turn lands in the active
    /// conversation, starting one if none is active. Fails only on malformed
    /// input (empty content, unknown conversation id) — over-capacity evicts
    /// instead of failing.
    pub fn append(&self, conversation_id: Option<&str>, turn: NewTurn) -> Result<AppendReceipt> {
        if turn.content.trim().is_empty() {
            return Err(EngineError::validation("turn content must not be empty"));
        }

        let mut inner = self.inner.write().expect("working memory lock poisoned");

        let (target_id, evicted) = match conversation_id {
            Some(id) => {
                if !inner.conversations.iter().any(|c| c.id == id) {
                    return Err(EngineError::validation(format!(
                        "conversation not found: {id}"
                    )));
                }
                (id.to_string(), None)
            }
            None => match inner.active.clone() {
                Some(id) => (id, None),
                None => start_locked(&mut inner, self.capacity),
            },
        };

        let now = Utc::now();
        let stored = ConversationTurn {
            id: uuid::Uuid::now_v7().to_string(),
            conversation_id: target_id.clone(),
            role: turn.role,
            content: turn.content,
            timestamp: now,
            entities: turn.entities,
            linked_pattern_ids: Vec::new(),
        };
        let turn_id = stored.id.clone();

        let conv = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == target_id)
            .expect("target conversation exists");
        conv.turns.push(stored);
        inner.last_write = Some(now);
        drop(inner);
        self.bump();

        Ok(AppendReceipt {
            conversation_id: target_id,
            turn_id,
            evicted,
        })
    }

    /// Most recent turns across all conversations, newest first.
    ///
    /// Ordered by turn timestamp, not conversation order — a turn appended
    /// late to an older conversation still surfaces first.
    pub fn recent(&self, limit: usize) -> Vec<ConversationTurn> {
        let inner = self.inner.read().expect("working memory lock poisoned");
        let mut turns: Vec<ConversationTurn> = inner
            .conversations
            .iter()
            .flat_map(|c| c.turns.iter())
            .cloned()
            .collect();
        turns.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        turns.truncate(limit);
        turns
    }

    /// Case-insensitive term search over turn content and entities.
    ///
    /// An empty store (or an unmatched query) returns an empty sequence,
    /// never an error.
    pub fn search(&self, query: &str, filter: &TurnFilter) -> Vec<ConversationTurn> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        let inner = self.inner.read().expect("working memory lock poisoned");
        inner
            .conversations
            .iter()
            .rev()
            .flat_map(|c| c.turns.iter().rev())
            .filter(|turn| {
                if let Some(role) = filter.role {
                    if turn.role != role {
                        return false;
                    }
                }
                if let Some(ref id) = filter.conversation_id {
                    if &turn.conversation_id != id {
                        return false;
                    }
                }
                if let Some(since) = filter.since {
                    if turn.timestamp < since {
                        return false;
                    }
                }
                terms.is_empty() || matches_terms(turn, &terms)
            })
            .cloned()
            .collect()
    }

    /// Conversation header, its most recent turns (bounded by the context
    /// window), and the union of their entity references.
    ///
    /// Older turns beyond the window stay stored for the audit trail; only
    /// the returned view is bounded.
    pub fn get_context(&self, conversation_id: &str) -> Result<TurnContext> {
        let inner = self.inner.read().expect("working memory lock poisoned");
        let conv = inner
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| EngineError::validation(format!(
                "conversation not found: {conversation_id}"
            )))?;

        let skip = conv.turns.len().saturating_sub(self.context_window);
        let prior_turns: Vec<ConversationTurn> = conv.turns[skip..].to_vec();
        let related_entities: BTreeSet<String> = prior_turns
            .iter()
            .flat_map(|t| t.entities.iter().cloned())
            .collect();

        Ok(TurnContext {
            current: conv.summary(),
            prior_turns,
            related_entities,
        })
    }

    /// Append a Tier 2 pattern id to a turn — the one permitted post-hoc
    /// mutation. Idempotent per (turn, pattern) pair.
    pub fn link_pattern(&self, turn_id: &str, pattern_id: &str) -> Result<()> {
        if pattern_id.trim().is_empty() {
            return Err(EngineError::validation("pattern id must not be empty"));
        }
        let mut inner = self.inner.write().expect("working memory lock poisoned");
        let turn = inner
            .conversations
            .iter_mut()
            .flat_map(|c| c.turns.iter_mut())
            .find(|t| t.id == turn_id)
            .ok_or_else(|| EngineError::validation(format!("turn not found: {turn_id}")))?;
        if !turn.linked_pattern_ids.iter().any(|p| p == pattern_id) {
            turn.linked_pattern_ids.push(pattern_id.to_string());
        }
        drop(inner);
        self.bump();
        Ok(())
    }

    pub fn stats(&self) -> WorkingStats {
        let inner = self.inner.read().expect("working memory lock poisoned");
        WorkingStats {
            conversations: inner.conversations.len() as u64,
            turns: inner.conversations.iter().map(|c| c.turns.len() as u64).sum(),
            active_conversation: inner.active.clone(),
            last_write: inner.last_write,
        }
    }

    /// Append-only export: one JSON line per turn, oldest first.
    pub fn export_jsonl(&self) -> Result<String> {
        let inner = self.inner.read().expect("working memory lock poisoned");
        let mut out = String::new();
        for conv in &inner.conversations {
            for turn in &conv.turns {
                let line = serde_json::to_string(turn)
                    .map_err(|e| EngineError::validation(format!("export failed: {e}")))?;
                let _ = writeln!(out, "{line}");
            }
        }
        Ok(out)
    }
}

/// Start a new conversation under the lock, evicting the oldest if needed.
fn start_locked(inner: &mut Inner, capacity: usize) -> (String, Option<String>) {
    let now = Utc::now();

    // End the previously active conversation; at most one is active.
    if let Some(prev_id) = inner.active.take() {
        if let Some(prev) = inner.conversations.iter_mut().find(|c| c.id == prev_id) {
            prev.active = false;
            prev.ended_at = Some(now);
        }
    }

    let id = uuid::Uuid::now_v7().to_string();
    inner.conversations.push_back(Conversation {
        id: id.clone(),
        started_at: now,
        ended_at: None,
        active: true,
        turns: Vec::new(),
    });
    inner.active = Some(id.clone());
    inner.last_write = Some(now);

    let mut evicted = None;
    if inner.conversations.len() > capacity {
        if let Some(old) = inner.conversations.pop_front() {
            tracing::info!(
                conversation = %old.id,
                turns = old.turns.len(),
                "evicted oldest conversation (FIFO bound)"
            );
            evicted = Some(old.id);
        }
    }

    (id, evicted)
}

fn matches_terms(turn: &ConversationTurn, terms: &[String]) -> bool {
    let content = turn.content.to_lowercase();
    terms.iter().any(|term| {
        content.contains(term)
            || turn
                .entities
                .iter()
                .any(|e| e.to_lowercase().contains(term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize) -> WorkingMemoryStore {
        WorkingMemoryStore::new(&WorkingMemoryConfig {
            capacity,
            context_window: 3,
        })
    }

    #[test]
    fn append_starts_conversation_when_none_active() {
        let store = store(5);
        let receipt = store
            .append(None, NewTurn::new(Role::User, "hello"))
            .unwrap();
        assert!(receipt.evicted.is_none());

        let stats = store.stats();
        assert_eq!(stats.conversations, 1);
        assert_eq!(stats.turns, 1);
        assert_eq!(stats.active_conversation.as_deref(), Some(receipt.conversation_id.as_str()));
    }

    #[test]
    fn append_rejects_empty_content() {
        let store = store(5);
        let result = store.append(None, NewTurn::new(Role::User, "   "));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn append_rejects_unknown_conversation() {
        let store = store(5);
        let result = store.append(Some("no-such-id"), NewTurn::new(Role::User, "hi"));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn fifo_evicts_oldest_conversation_wholesale() {
        let store = store(3);
        let mut ids = Vec::new();
        for label in ["a", "b", "c"] {
            let (id, evicted) = store.start_conversation();
            assert!(evicted.is_none());
            store
                .append(Some(&id), NewTurn::new(Role::User, format!("turn in {label}")))
                .unwrap();
            ids.push(id);
        }

        let (fourth, evicted) = store.start_conversation();
        assert_eq!(evicted.as_deref(), Some(ids[0].as_str()));

        let stats = store.stats();
        assert_eq!(stats.conversations, 3);
        // Evicted conversation is fully gone, turns included.
        assert!(store.get_context(&ids[0]).is_err());
        assert!(store.get_context(&fourth).is_ok());
    }

    #[test]
    fn recent_returns_newest_first() {
        let store = store(5);
        for i in 0..4 {
            store
                .append(None, NewTurn::new(Role::User, format!("turn {i}")))
                .unwrap();
        }
        let recent = store.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "turn 3");
        assert_eq!(recent[1].content, "turn 2");
    }

    #[test]
    fn search_empty_store_returns_empty() {
        let store = store(5);
        assert!(store.search("anything", &TurnFilter::default()).is_empty());
    }

    #[test]
    fn search_matches_content_and_entities() {
        let store = store(5);
        store
            .append(
                None,
                NewTurn::new(Role::User, "refactor the allocator")
                    .with_entities(["src/budget.rs"]),
            )
            .unwrap();
        store
            .append(None, NewTurn::new(Role::Assistant, "done"))
            .unwrap();

        assert_eq!(store.search("allocator", &TurnFilter::default()).len(), 1);
        assert_eq!(store.search("budget", &TurnFilter::default()).len(), 1);
        assert!(store.search("parser", &TurnFilter::default()).is_empty());

        let filter = TurnFilter {
            role: Some(Role::Assistant),
            ..Default::default()
        };
        let hits = store.search("done", &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].role, Role::Assistant);
    }

    #[test]
    fn get_context_bounds_window_keeps_audit_trail() {
        let store = store(5); // window of 3
        let (conv, _) = store.start_conversation();
        for i in 0..6 {
            store
                .append(
                    Some(&conv),
                    NewTurn::new(Role::User, format!("turn {i}")).with_entities([format!("f{i}")]),
                )
                .unwrap();
        }

        let ctx = store.get_context(&conv).unwrap();
        assert_eq!(ctx.prior_turns.len(), 3);
        assert_eq!(ctx.prior_turns[0].content, "turn 3");
        assert_eq!(ctx.prior_turns[2].content, "turn 5");
        assert_eq!(ctx.current.turn_count, 6); // full trail retained
        assert!(ctx.related_entities.contains("f5"));
        assert!(!ctx.related_entities.contains("f0"));
    }

    #[test]
    fn link_pattern_is_idempotent() {
        let store = store(5);
        let receipt = store
            .append(None, NewTurn::new(Role::Assistant, "applied a pattern"))
            .unwrap();

        store.link_pattern(&receipt.turn_id, "pat-1").unwrap();
        store.link_pattern(&receipt.turn_id, "pat-1").unwrap();
        store.link_pattern(&receipt.turn_id, "pat-2").unwrap();

        let ctx = store.get_context(&receipt.conversation_id).unwrap();
        assert_eq!(ctx.prior_turns[0].linked_pattern_ids, vec!["pat-1", "pat-2"]);

        assert!(store.link_pattern("missing-turn", "pat-1").is_err());
    }

    #[test]
    fn end_conversation_is_idempotent() {
        let store = store(5);
        let (conv, _) = store.start_conversation();
        store.end_conversation(&conv).unwrap();
        store.end_conversation(&conv).unwrap();

        let ctx = store.get_context(&conv).unwrap();
        assert!(!ctx.current.active);
        assert!(ctx.current.ended_at.is_some());
        assert!(store.stats().active_conversation.is_none());
    }

    #[test]
    fn version_bumps_on_writes() {
        let store = store(5);
        let v0 = store.version();
        store.append(None, NewTurn::new(Role::User, "x")).unwrap();
        assert!(store.version() > v0);
    }

    #[test]
    fn export_is_one_line_per_turn() {
        let store = store(5);
        store.append(None, NewTurn::new(Role::User, "one")).unwrap();
        store.append(None, NewTurn::new(Role::Assistant, "two")).unwrap();

        let export = store.export_jsonl().unwrap();
        let lines: Vec<&str> = export.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"one\""));
        assert!(serde_json::from_str::<serde_json::Value>(lines[1]).is_ok());
    }
}
