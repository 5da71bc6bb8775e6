mod helpers;

use chrono::{Duration, Utc};
use helpers::{graph_store, init_tracing, test_config};
use strata::graph::{NewPattern, PatternFilter};

#[test]
fn sixty_days_of_non_use_decays_two_intervals() {
    init_tracing();
    let store = graph_store(&test_config());
    let id = store
        .store_pattern(&NewPattern::new("extract helper for repeated match arms", "refactoring", 0.80))
        .unwrap()
        .id;

    // 5%/30-day interval, last used 60 days before the sweep.
    let outcome = store.apply_decay_at(Utc::now() + Duration::days(60)).unwrap();
    assert_eq!(outcome.decayed, 1);
    assert_eq!(outcome.pruned, 0);

    let pattern = store.get_pattern(&id).unwrap().unwrap();
    // 0.80 × 0.95² ≈ 0.7220
    assert!((pattern.confidence - 0.7220).abs() < 0.0005);
}

#[test]
fn decay_never_increases_confidence() {
    let store = graph_store(&test_config());
    let mut ids = Vec::new();
    for (title, confidence) in [("a", 0.9), ("b", 0.5), ("c", 1.0)] {
        ids.push(store.store_pattern(&NewPattern::new(title, "c", confidence)).unwrap().id);
    }

    let before: Vec<f64> = ids
        .iter()
        .map(|id| store.get_pattern(id).unwrap().unwrap().confidence)
        .collect();

    store.apply_decay_at(Utc::now() + Duration::days(365)).unwrap();

    for (id, old) in ids.iter().zip(before) {
        if let Some(pattern) = store.get_pattern(id).unwrap() {
            assert!(pattern.confidence <= old);
            // A year of non-use strictly decreases confidence.
            assert!(pattern.confidence < old);
        }
        // Pruned patterns decreased all the way out — also fine.
    }
}

#[test]
fn pruned_patterns_vanish_from_search() {
    let store = graph_store(&test_config());
    store
        .store_pattern(&NewPattern::new("obsolete callback idiom", "async", 0.31))
        .unwrap();
    store
        .store_pattern(&NewPattern::new("current async idiom", "async", 0.95))
        .unwrap();

    // One interval: 0.31 × 0.95 ≈ 0.2945 < floor (0.3) → pruned.
    let outcome = store.apply_decay_at(Utc::now() + Duration::days(31)).unwrap();
    assert_eq!(outcome.pruned, 1);

    let hits = store
        .search_patterns("idiom", &PatternFilter::default(), 10)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].pattern.title, "current async idiom");
}

#[test]
fn sweep_is_idempotent_at_an_instant() {
    let store = graph_store(&test_config());
    let id = store
        .store_pattern(&NewPattern::new("aging", "c", 0.8))
        .unwrap()
        .id;

    let sweep_time = Utc::now() + Duration::days(60);
    store.apply_decay_at(sweep_time).unwrap();
    let first = store.get_pattern(&id).unwrap().unwrap().confidence;

    let outcome = store.apply_decay_at(sweep_time).unwrap();
    assert_eq!(outcome.decayed, 0);
    let second = store.get_pattern(&id).unwrap().unwrap().confidence;
    assert_eq!(first, second);
}

#[test]
fn boost_caps_at_one_and_resets_the_clock() {
    let store = graph_store(&test_config());
    let id = store
        .store_pattern(&NewPattern::new("solid pattern", "c", 0.98))
        .unwrap()
        .id;

    // Default boost amount is 0.05 — capped at 1.0.
    let result = store.boost(&id).unwrap();
    assert!((result.confidence - 1.0).abs() < 1e-9);

    let pattern = store.get_pattern(&id).unwrap().unwrap();
    assert_eq!(pattern.usage_count, 1);

    // The boost just reset last_used_at, so a sweep 29 days later finds no
    // whole interval elapsed.
    let outcome = store.apply_decay_at(Utc::now() + Duration::days(29)).unwrap();
    assert_eq!(outcome.decayed, 0);
    assert!((store.get_pattern(&id).unwrap().unwrap().confidence - 1.0).abs() < 1e-9);
}

#[test]
fn usage_links_survive_until_prune_cascades() {
    let store = graph_store(&test_config());
    let id = store
        .store_pattern(&NewPattern::new("doomed", "c", 0.31))
        .unwrap()
        .id;
    store.record_usage(&id, "conversation-9").unwrap();

    let pattern = store.get_pattern(&id).unwrap().unwrap();
    assert_eq!(pattern.applied_in_conversation_ids, vec!["conversation-9"]);

    store.apply_decay_at(Utc::now() + Duration::days(31)).unwrap();
    assert!(store.get_pattern(&id).unwrap().is_none());
}
