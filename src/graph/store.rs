//! Tier 2 write path — validation, storage, boosting, and audit logging.
//!
//! [`store_pattern`] runs the full pipeline inside a transaction: validate,
//! insert into the patterns table, sync the FTS5 index, and write an audit
//! log row. Every mutation in this module leaves a `pattern_log` trace.

use anyhow::Context as _;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::{MaintenanceConfig, ScoringConfig, StrataConfig};
use crate::error::{EngineError, Result};
use crate::graph::maintenance::{self, DecayOutcome};
use crate::graph::relations::{self, RelationshipReceipt};
use crate::graph::search::{self, PatternFilter, RankedPattern};
use crate::graph::types::{NewPattern, Pattern, Relationship};

/// Result returned from a store operation.
#[derive(Debug, Serialize)]
pub struct StorePatternResult {
    /// UUID of the stored pattern.
    pub id: String,
}

/// Result returned from a boost operation.
#[derive(Debug, Serialize)]
pub struct BoostResult {
    pub id: String,
    /// Confidence after the boost (capped at 1.0).
    pub confidence: f64,
}

/// Store statistics, consumed by the quality monitor.
#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub patterns: u64,
    pub relationships: u64,
    pub conversation_links: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    /// Timestamp of the most recent audited mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_write: Option<String>,
}

/// Validated insert: patterns row + FTS sync + audit log, in one transaction.
pub fn store_pattern(conn: &mut Connection, new: &NewPattern) -> Result<StorePatternResult> {
    if new.title.trim().is_empty() {
        return Err(EngineError::validation("pattern title must not be empty"));
    }
    if !(0.0..=1.0).contains(&new.confidence) {
        return Err(EngineError::validation(format!(
            "pattern confidence must be in [0, 1], got {}",
            new.confidence
        )));
    }

    let tx = conn.transaction()?;
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let context_json = new.context.to_string();

    tx.execute(
        "INSERT INTO patterns (id, title, category, confidence, context, usage_count, created_at, last_used_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
        params![id, new.title, new.category, new.confidence, context_json, now],
    )?;
    let rowid = tx.last_insert_rowid();

    insert_fts(&tx, rowid, &new.title, &context_json, &id)?;
    write_audit_log(&tx, "create", &id, None)?;

    tx.commit()?;
    Ok(StorePatternResult { id })
}

/// Sync the FTS5 index after inserting into the patterns table.
///
/// Must use the same rowid as the corresponding `patterns` row.
fn insert_fts(
    conn: &Transaction,
    rowid: i64,
    title: &str,
    context: &str,
    id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO patterns_fts (rowid, title, context, id) VALUES (?1, ?2, ?3, ?4)",
        params![rowid, title, context, id],
    )?;
    Ok(())
}

/// Fetch a single pattern with its Tier 1 back-references.
pub fn get_pattern(conn: &Connection, id: &str) -> Result<Option<Pattern>> {
    let row = conn
        .query_row(
            "SELECT id, title, category, confidence, context, usage_count, created_at, last_used_at \
             FROM patterns WHERE id = ?1",
            params![id],
            map_pattern_row,
        )
        .optional()?;

    let Some(mut pattern) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT conversation_id FROM pattern_conversations \
         WHERE pattern_id = ?1 ORDER BY linked_at",
    )?;
    pattern.applied_in_conversation_ids = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(Some(pattern))
}

pub(crate) fn map_pattern_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pattern> {
    let context_text: String = row.get(4)?;
    Ok(Pattern {
        id: row.get(0)?,
        title: row.get(1)?,
        category: row.get(2)?,
        confidence: row.get(3)?,
        context: serde_json::from_str(&context_text)
            .unwrap_or(serde_json::Value::Null),
        usage_count: row.get(5)?,
        created_at: row.get(6)?,
        last_used_at: row.get(7)?,
        applied_in_conversation_ids: Vec::new(),
    })
}

/// Boost on successful reuse: confidence rises by `amount` (capped at 1.0),
/// `last_used_at` resets the decay clock, `usage_count` increments.
pub fn boost(conn: &Connection, pattern_id: &str, amount: f64) -> Result<BoostResult> {
    if !(0.0..=1.0).contains(&amount) {
        return Err(EngineError::validation(format!(
            "boost amount must be in [0, 1], got {amount}"
        )));
    }
    let now = chrono::Utc::now().to_rfc3339();
    let affected = conn.execute(
        "UPDATE patterns SET confidence = MIN(confidence + ?1, 1.0), \
         last_used_at = ?2, usage_count = usage_count + 1 WHERE id = ?3",
        params![amount, now, pattern_id],
    )?;
    if affected == 0 {
        return Err(EngineError::validation(format!(
            "pattern not found: {pattern_id}"
        )));
    }

    let confidence: f64 = conn.query_row(
        "SELECT confidence FROM patterns WHERE id = ?1",
        params![pattern_id],
        |row| row.get(0),
    )?;
    write_audit_log(
        conn,
        "boost",
        pattern_id,
        Some(&serde_json::json!({"amount": amount, "confidence": confidence})),
    )?;

    Ok(BoostResult {
        id: pattern_id.to_string(),
        confidence,
    })
}

/// Record that a pattern was applied in a Tier 1 conversation.
///
/// The conversation id is opaque here (non-owning back-reference), so the
/// link survives Tier 1 eviction. Idempotent per (pattern, conversation).
pub fn record_usage(conn: &Connection, pattern_id: &str, conversation_id: &str) -> Result<()> {
    if conversation_id.trim().is_empty() {
        return Err(EngineError::validation("conversation id must not be empty"));
    }
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM patterns WHERE id = ?1",
        params![pattern_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(EngineError::validation(format!(
            "pattern not found: {pattern_id}"
        )));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pattern_conversations (pattern_id, conversation_id, linked_at) \
         VALUES (?1, ?2, ?3)",
        params![pattern_id, conversation_id, now],
    )?;
    if inserted > 0 {
        write_audit_log(
            conn,
            "link",
            pattern_id,
            Some(&serde_json::json!({"conversation_id": conversation_id})),
        )?;
    }
    Ok(())
}

/// Compute graph statistics.
pub fn graph_stats(conn: &Connection) -> Result<GraphStats> {
    let patterns: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |r| r.get(0))?;
    let relationships: i64 =
        conn.query_row("SELECT COUNT(*) FROM relationships", [], |r| r.get(0))?;
    let conversation_links: i64 =
        conn.query_row("SELECT COUNT(*) FROM pattern_conversations", [], |r| r.get(0))?;
    let avg_confidence: Option<f64> =
        conn.query_row("SELECT AVG(confidence) FROM patterns", [], |r| r.get(0))?;
    let last_write: Option<String> =
        conn.query_row("SELECT MAX(created_at) FROM pattern_log", [], |r| r.get(0))?;

    Ok(GraphStats {
        patterns: patterns as u64,
        relationships: relationships as u64,
        conversation_links: conversation_links as u64,
        avg_confidence,
        last_write,
    })
}

/// Append-only export: one JSON line per pattern, oldest first.
pub fn export_jsonl(conn: &Connection) -> Result<String> {
    let mut stmt = conn.prepare(
        "SELECT id, title, category, confidence, context, usage_count, created_at, last_used_at \
         FROM patterns ORDER BY created_at",
    )?;
    let patterns = stmt
        .query_map([], map_pattern_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = String::new();
    for pattern in patterns {
        let line = serde_json::to_string(&pattern)
            .map_err(|e| EngineError::validation(format!("export failed: {e}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Write an entry to the pattern_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    pattern_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO pattern_log (operation, pattern_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, pattern_id, details_json, now],
    )?;
    Ok(())
}

// ── Shared store handle ──────────────────────────────────────────────────────

/// Tier 2 store: a SQLite connection behind a mutex, shared via `Arc`.
///
/// All access serializes on the mutex; the decay sweep runs its whole batch
/// under it inside one transaction, so readers see pre- or post-sweep state,
/// never a torn one.
pub struct KnowledgeGraphStore {
    conn: Mutex<Connection>,
    maintenance: MaintenanceConfig,
    scoring: ScoringConfig,
    version: AtomicU64,
}

impl KnowledgeGraphStore {
    /// Open (or create) the on-disk store at the configured path.
    pub fn open(config: &StrataConfig) -> anyhow::Result<Self> {
        let conn = crate::db::open_database(config.resolved_db_path())
            .context("failed to open knowledge graph database")?;
        Ok(Self::from_connection(conn, config))
    }

    /// In-memory store for tests and throwaway graphs.
    pub fn open_in_memory(config: &StrataConfig) -> anyhow::Result<Self> {
        let conn = crate::db::open_memory_database()?;
        Ok(Self::from_connection(conn, config))
    }

    fn from_connection(conn: Connection, config: &StrataConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            maintenance: config.maintenance.clone(),
            scoring: config.scoring.clone(),
            version: AtomicU64::new(0),
        }
    }

    pub fn maintenance_config(&self) -> &MaintenanceConfig {
        &self.maintenance
    }

    /// Monotonic write counter for bundle-cache invalidation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("graph connection lock poisoned")
    }

    pub fn store_pattern(&self, new: &NewPattern) -> Result<StorePatternResult> {
        let mut conn = self.lock();
        let result = store_pattern(&mut conn, new)?;
        drop(conn);
        self.bump();
        Ok(result)
    }

    pub fn get_pattern(&self, id: &str) -> Result<Option<Pattern>> {
        get_pattern(&self.lock(), id)
    }

    /// Boost with the configured delta.
    pub fn boost(&self, pattern_id: &str) -> Result<BoostResult> {
        self.boost_by(pattern_id, self.maintenance.boost_amount)
    }

    pub fn boost_by(&self, pattern_id: &str, amount: f64) -> Result<BoostResult> {
        let conn = self.lock();
        let result = boost(&conn, pattern_id, amount)?;
        drop(conn);
        self.bump();
        Ok(result)
    }

    pub fn record_usage(&self, pattern_id: &str, conversation_id: &str) -> Result<()> {
        let conn = self.lock();
        record_usage(&conn, pattern_id, conversation_id)?;
        drop(conn);
        self.bump();
        Ok(())
    }

    pub fn search_patterns(
        &self,
        query: &str,
        filter: &PatternFilter,
        limit: usize,
    ) -> Result<Vec<RankedPattern>> {
        search::search_patterns(&self.lock(), query, filter, limit, &self.scoring)
    }

    pub fn record_relationship(
        &self,
        subject: &str,
        object: &str,
        relationship_type: &str,
        observed_strength: f64,
    ) -> Result<RelationshipReceipt> {
        let conn = self.lock();
        let result = relations::record_relationship(
            &conn,
            subject,
            object,
            relationship_type,
            observed_strength,
            self.maintenance.relationship_smoothing,
        )?;
        drop(conn);
        self.bump();
        Ok(result)
    }

    pub fn get_relationships(
        &self,
        entity: &str,
        types: &[String],
        min_strength: f64,
    ) -> Result<Vec<Relationship>> {
        relations::get_relationships(&self.lock(), entity, types, min_strength)
    }

    /// Run the decay/prune sweep now.
    pub fn apply_decay(&self) -> Result<DecayOutcome> {
        self.apply_decay_at(chrono::Utc::now())
    }

    /// Clock-explicit sweep variant.
    pub fn apply_decay_at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<DecayOutcome> {
        let mut conn = self.lock();
        let outcome = maintenance::apply_decay_at(&mut conn, &self.maintenance, now)?;
        drop(conn);
        if outcome.decayed > 0 || outcome.pruned > 0 || outcome.relationships_decayed > 0 {
            self.bump();
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        graph_stats(&self.lock())
    }

    pub fn export_jsonl(&self) -> Result<String> {
        export_jsonl(&self.lock())
    }
}
