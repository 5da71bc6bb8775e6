mod helpers;

use helpers::{init_tracing, test_config};
use strata::working::{NewTurn, Role, TurnFilter, WorkingMemoryStore};

fn capacity_3_store() -> WorkingMemoryStore {
    init_tracing();
    WorkingMemoryStore::new(&test_config().working)
}

#[test]
fn fifo_bound_holds_for_n_plus_one_conversations() {
    let store = capacity_3_store();

    let mut ids = Vec::new();
    for i in 0..4 {
        let (id, _) = store.start_conversation();
        store
            .append(Some(&id), NewTurn::new(Role::User, format!("conversation {i}")))
            .unwrap();
        ids.push(id);
    }

    // Exactly N remain; the oldest is absent.
    let stats = store.stats();
    assert_eq!(stats.conversations, 3);
    assert!(store.get_context(&ids[0]).is_err());
    for id in &ids[1..] {
        assert!(store.get_context(id).is_ok());
    }
}

#[test]
fn recent_after_overflow_returns_d_c_b() {
    let store = capacity_3_store();

    // Conversations A, B, C, D in order, one turn each.
    for label in ["A", "B", "C", "D"] {
        let (id, _) = store.start_conversation();
        store
            .append(Some(&id), NewTurn::new(Role::User, label))
            .unwrap();
    }

    let recent = store.recent(10);
    let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["D", "C", "B"]);
}

#[test]
fn eviction_is_reported_not_silent() {
    let store = capacity_3_store();

    let (first, evicted) = store.start_conversation();
    assert!(evicted.is_none());
    for _ in 0..2 {
        store.start_conversation();
    }

    let (_, evicted) = store.start_conversation();
    assert_eq!(evicted.as_deref(), Some(first.as_str()));
}

#[test]
fn append_validates_but_never_fails_on_capacity() {
    let store = capacity_3_store();

    // Fill well past capacity — every append still succeeds.
    for i in 0..10 {
        store.start_conversation();
        store
            .append(None, NewTurn::new(Role::User, format!("turn {i}")))
            .unwrap();
    }
    assert_eq!(store.stats().conversations, 3);

    // Malformed input is the only failure mode.
    assert!(store.append(None, NewTurn::new(Role::User, "")).is_err());
}

#[test]
fn context_window_bounds_returned_turns_only() {
    let store = capacity_3_store(); // window of 3
    let (conv, _) = store.start_conversation();
    for i in 0..8 {
        store
            .append(Some(&conv), NewTurn::new(Role::Assistant, format!("step {i}")))
            .unwrap();
    }

    let ctx = store.get_context(&conv).unwrap();
    assert_eq!(ctx.prior_turns.len(), 3);
    assert_eq!(ctx.prior_turns[2].content, "step 7");
    // Full audit trail retained behind the window.
    assert_eq!(ctx.current.turn_count, 8);
}

#[test]
fn search_on_empty_store_is_empty_not_error() {
    let store = capacity_3_store();
    assert!(store.search("anything at all", &TurnFilter::default()).is_empty());
}

#[test]
fn turns_link_patterns_across_tiers() {
    let store = capacity_3_store();
    let receipt = store
        .append(None, NewTurn::new(Role::Assistant, "applied the error pattern"))
        .unwrap();

    store.link_pattern(&receipt.turn_id, "pattern-123").unwrap();

    let ctx = store.get_context(&receipt.conversation_id).unwrap();
    assert_eq!(ctx.prior_turns[0].linked_pattern_ids, vec!["pattern-123"]);
}
