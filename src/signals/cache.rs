//! Tier 3 — short-TTL cache of externally computed repository signals.
//!
//! Pure TTL semantics: a snapshot older than `computed_at + ttl_seconds` is a
//! cache miss, never a returned value — downstream freshness warnings depend
//! on it. Stale entries are removed when observed. The key space (per-file
//! signals) can be unbounded, so the cache carries an LRU fallback bound.
//!
//! The `*_at` variants take the clock explicitly; the plain methods call them
//! with `Utc::now()`. Deterministic callers (tests, replay) use the former.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::config::SignalConfig;
use crate::error::{EngineError, Result};

/// A cached repository-signal snapshot.
///
/// The payload is an opaque metrics blob computed externally (churn,
/// hotspots, test/build health); only the cache contract lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// File path, or `"global"` for repository-wide signals.
    pub key: String,
    pub payload: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl SignalSnapshot {
    /// Stale once `now > computed_at + ttl_seconds`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now > self.computed_at + Duration::seconds(self.ttl_seconds as i64)
    }
}

struct Entry {
    snapshot: SignalSnapshot,
    /// Logical access tick for LRU eviction.
    touched: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
    last_write: Option<DateTime<Utc>>,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SignalStats {
    pub entries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write: Option<DateTime<Utc>>,
}

pub struct SignalCache {
    inner: RwLock<Inner>,
    max_entries: usize,
    default_ttl_seconds: u64,
    version: AtomicU64,
}

impl SignalCache {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                tick: 0,
                last_write: None,
            }),
            max_entries: config.max_entries.max(1),
            default_ttl_seconds: config.default_ttl_seconds.max(1),
            version: AtomicU64::new(0),
        }
    }

    /// Insert with the configured default TTL.
    pub fn put_default(&self, key: &str, payload: serde_json::Value) -> Result<()> {
        self.put(key, payload, self.default_ttl_seconds)
    }

    /// Monotonic write counter for bundle-cache invalidation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Fresh snapshot for `key`, or a miss. A stale entry is removed and
    /// reported as a miss — the expired payload is never returned.
    pub fn get(&self, key: &str) -> Option<SignalSnapshot> {
        self.get_at(key, Utc::now())
    }

    /// Clock-explicit variant of [`get`](Self::get).
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<SignalSnapshot> {
        let mut inner = self.inner.write().expect("signal cache lock poisoned");
        let stale = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.snapshot.is_stale_at(now),
        };
        if stale {
            inner.entries.remove(key);
            tracing::debug!(key, "signal expired, treating as miss");
            return None;
        }
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.get_mut(key).expect("entry checked above");
        entry.touched = tick;
        Some(entry.snapshot.clone())
    }

    /// Insert or replace a snapshot. Evicts the least-recently-accessed
    /// entry when the bound is exceeded (stale entries are purged first).
    pub fn put(
        &self,
        key: &str,
        payload: serde_json::Value,
        ttl_seconds: u64,
    ) -> Result<()> {
        self.put_at(key, payload, ttl_seconds, Utc::now())
    }

    /// Clock-explicit variant of [`put`](Self::put).
    pub fn put_at(
        &self,
        key: &str,
        payload: serde_json::Value,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if key.trim().is_empty() {
            return Err(EngineError::validation("signal key must not be empty"));
        }
        if ttl_seconds == 0 {
            return Err(EngineError::validation("signal ttl must be positive"));
        }

        let mut inner = self.inner.write().expect("signal cache lock poisoned");
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key.to_string(),
            Entry {
                snapshot: SignalSnapshot {
                    key: key.to_string(),
                    payload,
                    computed_at: now,
                    ttl_seconds,
                },
                touched: tick,
            },
        );
        inner.last_write = Some(now);

        if inner.entries.len() > self.max_entries {
            evict_one(&mut inner, now);
        }
        drop(inner);
        self.bump();
        Ok(())
    }

    /// Drop a key regardless of freshness.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.write().expect("signal cache lock poisoned");
        if inner.entries.remove(key).is_some() {
            drop(inner);
            self.bump();
        }
    }

    /// `true` if the key is absent or expired.
    pub fn is_stale(&self, key: &str) -> bool {
        self.is_stale_at(key, Utc::now())
    }

    /// Clock-explicit variant of [`is_stale`](Self::is_stale).
    pub fn is_stale_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let inner = self.inner.read().expect("signal cache lock poisoned");
        match inner.entries.get(key) {
            None => true,
            Some(entry) => entry.snapshot.is_stale_at(now),
        }
    }

    /// Keys with non-stale snapshots.
    pub fn fresh_keys_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.inner.read().expect("signal cache lock poisoned");
        inner
            .entries
            .values()
            .filter(|e| !e.snapshot.is_stale_at(now))
            .map(|e| e.snapshot.key.clone())
            .collect()
    }

    pub fn stats(&self) -> SignalStats {
        let inner = self.inner.read().expect("signal cache lock poisoned");
        SignalStats {
            entries: inner.entries.len() as u64,
            last_write: inner.last_write,
        }
    }
}

/// Evict one entry: a stale one if any exists, otherwise the
/// least-recently-accessed.
fn evict_one(inner: &mut Inner, now: DateTime<Utc>) {
    let victim = inner
        .entries
        .iter()
        .find(|(_, e)| e.snapshot.is_stale_at(now))
        .map(|(k, _)| k.clone())
        .or_else(|| {
            inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone())
        });
    if let Some(key) = victim {
        inner.entries.remove(&key);
        tracing::debug!(%key, "evicted signal (LRU bound)");
    }
}
