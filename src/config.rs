use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrataConfig {
    pub storage: StorageConfig,
    pub working: WorkingMemoryConfig,
    pub signals: SignalConfig,
    pub scoring: ScoringConfig,
    pub maintenance: MaintenanceConfig,
    pub quality: QualityConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Maximum conversations held before FIFO eviction (whole conversations).
    pub capacity: usize,
    /// Turns returned per conversation by `get_context`.
    pub context_window: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SignalConfig {
    /// LRU bound on cached snapshots.
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    /// Tier 1 recency decay half-life.
    pub recency_half_life_hours: f64,
    pub match_weight: f64,
    pub confidence_weight: f64,
    pub usage_weight: f64,
    /// Per-tier aggregate relevance = mean of the top K item scores.
    pub aggregate_top_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Hours between periodic decay sweeps when enabled.
    pub sweep_interval_hours: u64,
    /// One decay interval, in days of non-use.
    pub decay_interval_days: u64,
    /// Fractional confidence loss per elapsed interval.
    pub decay_rate: f64,
    /// Patterns below this confidence are pruned during the sweep.
    pub confidence_floor: f64,
    /// Confidence delta applied by `boost`, capped at 1.0.
    pub boost_amount: f64,
    /// Fractional relationship-strength loss per elapsed interval.
    pub relationship_decay_rate: f64,
    /// EMA smoothing for repeated relationship observation.
    pub relationship_smoothing: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QualityConfig {
    /// Acceptable age of the last write, per tier.
    pub tier1_freshness_secs: u64,
    pub tier2_freshness_secs: u64,
    pub tier3_freshness_secs: u64,
    /// Query latency targets, per tier.
    pub tier1_latency_target_ms: u64,
    pub tier2_latency_target_ms: u64,
    pub tier3_latency_target_ms: u64,
    /// Coverage minimums: item counts below these degrade the coverage score.
    pub tier1_min_conversations: u64,
    pub tier2_min_patterns: u64,
    pub tier3_min_signals: u64,
    pub staleness_weight: f64,
    pub coverage_weight: f64,
    pub performance_weight: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub tier1_timeout_ms: u64,
    pub tier2_timeout_ms: u64,
    pub tier3_timeout_ms: u64,
    /// Composite bundle cache TTL.
    pub bundle_ttl_seconds: u64,
    pub bundle_cache_entries: usize,
    /// Candidates fetched per tier before scoring and truncation.
    pub max_candidates_per_tier: usize,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            working: WorkingMemoryConfig::default(),
            signals: SignalConfig::default(),
            scoring: ScoringConfig::default(),
            maintenance: MaintenanceConfig::default(),
            quality: QualityConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_strata_dir()
            .join("graph.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            context_window: 10,
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            default_ttl_seconds: 300,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_half_life_hours: 24.0,
            match_weight: 0.5,
            confidence_weight: 0.35,
            usage_weight: 0.15,
            aggregate_top_k: 3,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sweep_interval_hours: 24,
            decay_interval_days: 30,
            decay_rate: 0.05,
            confidence_floor: 0.3,
            boost_amount: 0.05,
            relationship_decay_rate: 0.02,
            relationship_smoothing: 0.3,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            tier1_freshness_secs: 24 * 3600,
            tier2_freshness_secs: 90 * 24 * 3600,
            tier3_freshness_secs: 7 * 24 * 3600,
            tier1_latency_target_ms: 50,
            tier2_latency_target_ms: 100,
            tier3_latency_target_ms: 20,
            tier1_min_conversations: 3,
            tier2_min_patterns: 10,
            tier3_min_signals: 5,
            staleness_weight: 0.35,
            coverage_weight: 0.35,
            performance_weight: 0.30,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tier1_timeout_ms: 250,
            tier2_timeout_ms: 250,
            tier3_timeout_ms: 250,
            bundle_ttl_seconds: 120,
            bundle_cache_entries: 64,
            max_candidates_per_tier: 20,
        }
    }
}

/// Returns `~/.strata/`
pub fn default_strata_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".strata")
}

/// Returns the default config file path: `~/.strata/config.toml`
pub fn default_config_path() -> PathBuf {
    default_strata_dir().join("config.toml")
}

impl StrataConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            StrataConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (STRATA_DB).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("STRATA_DB") {
            self.storage.db_path = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
