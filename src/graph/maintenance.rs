//! Confidence decay, floor pruning, and relationship-strength decay.
//!
//! The sweep reduces each pattern's confidence by the configured fractional
//! rate per whole decay-interval elapsed since it was last used, applied
//! multiplicatively: `confidence *= (1 - rate)^intervals`. Patterns whose
//! confidence falls below the floor are hard-deleted in the same transaction.
//! Relationship strength decays the same way but edges are never deleted.
//!
//! Each row carries a `decayed_at` checkpoint: intervals are counted from the
//! later of `last_used_at` and the checkpoint, and the checkpoint advances by
//! exactly the consumed intervals. Re-running the sweep at the same instant
//! is therefore a no-op, and partial intervals carry over to the next run.
//! A boost resets `last_used_at`, which resets the decay clock.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::Arc;

use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::graph::store::{write_audit_log, KnowledgeGraphStore};

/// Outcome of one decay/prune sweep.
#[derive(Debug, Clone, Serialize)]
pub struct DecayOutcome {
    /// Patterns whose confidence was reduced (and survived the floor).
    pub decayed: usize,
    /// Patterns hard-deleted for falling below the confidence floor.
    pub pruned: usize,
    /// Relationships whose strength was reduced.
    pub relationships_decayed: usize,
}

struct PatternRow {
    rowid: i64,
    id: String,
    title: String,
    context: String,
    confidence: f64,
    last_used_at: String,
    decayed_at: Option<String>,
}

struct RelationshipRow {
    id: String,
    strength: f64,
    updated_at: String,
    decayed_at: Option<String>,
}

/// Run the sweep against the current clock.
pub fn apply_decay(conn: &mut Connection, config: &MaintenanceConfig) -> Result<DecayOutcome> {
    apply_decay_at(conn, config, Utc::now())
}

/// Clock-explicit sweep. One transaction covers the whole batch, so
/// concurrent readers observe either the pre- or post-sweep state.
pub fn apply_decay_at(
    conn: &mut Connection,
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
) -> Result<DecayOutcome> {
    let interval_days = config.decay_interval_days.max(1) as i64;
    let tx = conn.transaction()?;

    let mut outcome = DecayOutcome {
        decayed: 0,
        pruned: 0,
        relationships_decayed: 0,
    };

    // ── Patterns ─────────────────────────────────────────────────────────
    let rows: Vec<PatternRow> = {
        let mut stmt = tx.prepare(
            "SELECT rowid, id, title, context, confidence, last_used_at, decayed_at \
             FROM patterns WHERE confidence > 0.0",
        )?;
        let collected = stmt
            .query_map([], |row| {
                Ok(PatternRow {
                    rowid: row.get(0)?,
                    id: row.get(1)?,
                    title: row.get(2)?,
                    context: row.get(3)?,
                    confidence: row.get(4)?,
                    last_used_at: row.get(5)?,
                    decayed_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collected
    };

    for row in rows {
        let Some((intervals, checkpoint)) =
            elapsed_intervals(&row.last_used_at, row.decayed_at.as_deref(), now, interval_days)
        else {
            continue;
        };

        let new_confidence = row.confidence * (1.0 - config.decay_rate).powi(intervals as i32);
        let new_checkpoint =
            (checkpoint + Duration::days(intervals * interval_days)).to_rfc3339();

        if new_confidence < config.confidence_floor {
            hard_delete_pattern(&tx, row.rowid, &row.id, &row.title, &row.context)?;
            outcome.pruned += 1;
        } else {
            tx.execute(
                "UPDATE patterns SET confidence = ?1, decayed_at = ?2 WHERE id = ?3",
                params![new_confidence, new_checkpoint, row.id],
            )?;
            outcome.decayed += 1;
        }
    }

    if outcome.decayed > 0 || outcome.pruned > 0 {
        // Synthetic pattern_id for the batch audit entry
        write_audit_log(
            &tx,
            "decay",
            "batch",
            Some(&serde_json::json!({
                "rate": config.decay_rate,
                "interval_days": interval_days,
                "decayed": outcome.decayed,
                "pruned": outcome.pruned,
            })),
        )?;
    }

    // ── Relationships (strength erodes, edges retained) ──────────────────
    let rels: Vec<RelationshipRow> = {
        let mut stmt = tx.prepare(
            "SELECT id, strength, updated_at, decayed_at FROM relationships WHERE strength > 0.0",
        )?;
        let collected = stmt
            .query_map([], |row| {
                Ok(RelationshipRow {
                    id: row.get(0)?,
                    strength: row.get(1)?,
                    updated_at: row.get(2)?,
                    decayed_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        collected
    };

    for rel in rels {
        let Some((intervals, checkpoint)) =
            elapsed_intervals(&rel.updated_at, rel.decayed_at.as_deref(), now, interval_days)
        else {
            continue;
        };

        let new_strength =
            (rel.strength * (1.0 - config.relationship_decay_rate).powi(intervals as i32)).max(0.0);
        let new_checkpoint =
            (checkpoint + Duration::days(intervals * interval_days)).to_rfc3339();

        tx.execute(
            "UPDATE relationships SET strength = ?1, decayed_at = ?2 WHERE id = ?3",
            params![new_strength, new_checkpoint, rel.id],
        )?;
        outcome.relationships_decayed += 1;
    }

    tx.commit()?;

    tracing::info!(
        decayed = outcome.decayed,
        pruned = outcome.pruned,
        relationships = outcome.relationships_decayed,
        "decay sweep complete"
    );
    Ok(outcome)
}

/// Whole intervals elapsed since the decay checkpoint (the later of the
/// last-use timestamp and the previous checkpoint). `None` when less than a
/// full interval has passed or a timestamp fails to parse.
fn elapsed_intervals(
    last_used_at: &str,
    decayed_at: Option<&str>,
    now: DateTime<Utc>,
    interval_days: i64,
) -> Option<(i64, DateTime<Utc>)> {
    let last_used = parse_ts(last_used_at)?;
    let checkpoint = match decayed_at.and_then(parse_ts_opt) {
        Some(decayed) if decayed > last_used => decayed,
        _ => last_used,
    };

    let elapsed_days = (now - checkpoint).num_days();
    let intervals = elapsed_days / interval_days;
    if intervals < 1 {
        return None;
    }
    Some((intervals, checkpoint))
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(err) => {
            tracing::warn!(value, %err, "unparseable timestamp, skipping row in sweep");
            None
        }
    }
}

fn parse_ts_opt(value: &str) -> Option<DateTime<Utc>> {
    parse_ts(value)
}

/// Hard delete a pruned pattern from the base table and the FTS index.
///
/// The FTS5 external-content table requires the special 'delete' insert with
/// the original column values.
fn hard_delete_pattern(
    conn: &Connection,
    rowid: i64,
    pattern_id: &str,
    title: &str,
    context: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO patterns_fts(patterns_fts, rowid, title, context, id) \
         VALUES('delete', ?1, ?2, ?3, ?4)",
        params![rowid, title, context, pattern_id],
    )?;

    write_audit_log(
        conn,
        "prune",
        pattern_id,
        Some(&serde_json::json!({"reason": "confidence_floor"})),
    )?;

    // Cascades pattern_conversations via FK
    conn.execute("DELETE FROM patterns WHERE id = ?1", params![pattern_id])?;
    Ok(())
}

/// Spawn the optional periodic sweep task, or `None` when maintenance is
/// disabled in config. Best-effort: failures are logged and the next tick
/// retries; running it concurrently with an on-demand sweep is safe because
/// sweeps serialize on the store mutex and checkpoint.
pub fn spawn_sweeper(store: Arc<KnowledgeGraphStore>) -> Option<tokio::task::JoinHandle<()>> {
    if !store.maintenance_config().enabled {
        tracing::info!("maintenance disabled, not spawning sweep task");
        return None;
    }
    let interval_hours = store.maintenance_config().sweep_interval_hours.max(1);
    Some(tokio::spawn(async move {
        let period = std::time::Duration::from_secs(interval_hours * 3600);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.apply_decay()).await {
                Ok(Ok(outcome)) => {
                    tracing::debug!(
                        decayed = outcome.decayed,
                        pruned = outcome.pruned,
                        "scheduled sweep finished"
                    );
                }
                Ok(Err(err)) => tracing::warn!(%err, "scheduled sweep failed"),
                Err(err) => tracing::warn!(%err, "scheduled sweep panicked"),
            }
        }
    }))
}
