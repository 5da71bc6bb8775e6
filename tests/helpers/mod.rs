#![allow(dead_code)]

use std::sync::Arc;

use strata::config::StrataConfig;
use strata::engine::ContextOrchestrator;
use strata::graph::KnowledgeGraphStore;
use strata::signals::SignalCache;
use strata::working::WorkingMemoryStore;

/// Install a test subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Default config with a small, test-friendly working memory.
pub fn test_config() -> StrataConfig {
    let mut config = StrataConfig::default();
    config.working.capacity = 3;
    config.working.context_window = 3;
    config
}

/// Fresh in-memory graph store.
pub fn graph_store(config: &StrataConfig) -> KnowledgeGraphStore {
    KnowledgeGraphStore::open_in_memory(config).unwrap()
}

/// All three tier stores plus an orchestrator wired over them.
pub fn orchestrator(
    config: &StrataConfig,
) -> (
    ContextOrchestrator,
    Arc<WorkingMemoryStore>,
    Arc<KnowledgeGraphStore>,
    Arc<SignalCache>,
) {
    let working = Arc::new(WorkingMemoryStore::new(&config.working));
    let graph = Arc::new(graph_store(config));
    let signals = Arc::new(SignalCache::new(&config.signals));
    let orchestrator = ContextOrchestrator::new(
        working.clone(),
        graph.clone(),
        signals.clone(),
        config,
    );
    (orchestrator, working, graph, signals)
}
