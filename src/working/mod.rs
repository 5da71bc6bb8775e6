//! Tier 1 — bounded FIFO cache of recent conversation turns.

pub mod store;
pub mod types;

pub use store::{AppendReceipt, TurnFilter, WorkingMemoryStore, WorkingStats};
pub use types::{Conversation, ConversationSummary, ConversationTurn, NewTurn, Role, TurnContext};
