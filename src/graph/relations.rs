//! Relationship recording between file-like identifiers.
//!
//! Recording is idempotent-additive: repeated observation of the same
//! (subject, object, type) triple increments `observation_count` and nudges
//! `strength` toward 1.0 via an exponential moving average — never a naive
//! sum, so strength stays bounded. Edges are never hard-deleted; the decay
//! sweep may erode strength toward zero but the edge remains for audit.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::graph::store::write_audit_log;
use crate::graph::types::Relationship;

/// Result returned from a record_relationship operation.
#[derive(Debug, Serialize)]
pub struct RelationshipReceipt {
    pub id: String,
    /// Strength after this observation.
    pub strength: f64,
    pub observation_count: u32,
    /// `false` if the triple already existed and was reinforced instead.
    pub created: bool,
}

/// Record one observation of a typed edge.
///
/// First observation inserts the edge at the observed strength; subsequent
/// ones apply `strength += smoothing · (1 − strength) · observed`, which
/// asymptotically approaches 1.0 scaled by how strong each co-observation is.
pub fn record_relationship(
    conn: &Connection,
    subject: &str,
    object: &str,
    relationship_type: &str,
    observed_strength: f64,
    smoothing: f64,
) -> Result<RelationshipReceipt> {
    if subject.trim().is_empty() || object.trim().is_empty() {
        return Err(EngineError::validation(
            "relationship endpoints must not be empty",
        ));
    }
    if subject == object {
        return Err(EngineError::validation(
            "relationship endpoints must differ",
        ));
    }
    if relationship_type.trim().is_empty() {
        return Err(EngineError::validation(
            "relationship type must not be empty",
        ));
    }
    if !(0.0..=1.0).contains(&observed_strength) {
        return Err(EngineError::validation(format!(
            "observed strength must be in [0, 1], got {observed_strength}"
        )));
    }

    let now = chrono::Utc::now().to_rfc3339();

    let existing: Option<(String, f64, u32)> = conn
        .query_row(
            "SELECT id, strength, observation_count FROM relationships \
             WHERE subject = ?1 AND object = ?2 AND relationship_type = ?3",
            params![subject, object, relationship_type],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((id, strength, count)) = existing {
        let reinforced =
            (strength + smoothing * (1.0 - strength) * observed_strength).clamp(0.0, 1.0);
        // Re-observation also resets the strength-decay clock.
        conn.execute(
            "UPDATE relationships SET strength = ?1, observation_count = ?2, \
             updated_at = ?3, decayed_at = NULL WHERE id = ?4",
            params![reinforced, count + 1, now, id],
        )?;
        write_audit_log(
            conn,
            "relate",
            &id,
            Some(&serde_json::json!({
                "observed": observed_strength,
                "strength": reinforced,
                "observation_count": count + 1,
            })),
        )?;
        return Ok(RelationshipReceipt {
            id,
            strength: reinforced,
            observation_count: count + 1,
            created: false,
        });
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO relationships \
         (id, subject, object, relationship_type, strength, observation_count, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![id, subject, object, relationship_type, observed_strength, now],
    )?;
    write_audit_log(
        conn,
        "relate",
        &id,
        Some(&serde_json::json!({
            "subject": subject,
            "object": object,
            "type": relationship_type,
            "strength": observed_strength,
        })),
    )?;

    Ok(RelationshipReceipt {
        id,
        strength: observed_strength,
        observation_count: 1,
        created: true,
    })
}

/// Edges touching `entity` (as subject or object), strongest first.
///
/// `types` narrows to the given edge labels when non-empty; `min_strength`
/// drops edges that have decayed below the caller's interest threshold.
pub fn get_relationships(
    conn: &Connection,
    entity: &str,
    types: &[String],
    min_strength: f64,
) -> Result<Vec<Relationship>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject, object, relationship_type, strength, observation_count, \
         created_at, updated_at FROM relationships \
         WHERE (subject = ?1 OR object = ?1) AND strength >= ?2 \
         ORDER BY strength DESC, updated_at DESC",
    )?;
    let rows = stmt
        .query_map(params![entity, min_strength], |row| {
            Ok(Relationship {
                id: row.get(0)?,
                subject: row.get(1)?,
                object: row.get(2)?,
                relationship_type: row.get(3)?,
                strength: row.get(4)?,
                observation_count: row.get(5)?,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|r| types.is_empty() || types.iter().any(|t| t == &r.relationship_type))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const SMOOTHING: f64 = 0.3;

    fn test_conn() -> Connection {
        db::open_memory_database().unwrap()
    }

    #[test]
    fn first_observation_creates_edge_at_observed_strength() {
        let conn = test_conn();
        let receipt = record_relationship(
            &conn, "src/a.rs", "src/b.rs", "co_changed", 0.6, SMOOTHING,
        )
        .unwrap();
        assert!(receipt.created);
        assert_eq!(receipt.observation_count, 1);
        assert!((receipt.strength - 0.6).abs() < 1e-9);
    }

    #[test]
    fn reobservation_is_ema_not_sum() {
        let conn = test_conn();
        record_relationship(&conn, "a", "b", "co_changed", 0.6, SMOOTHING).unwrap();
        let second =
            record_relationship(&conn, "a", "b", "co_changed", 1.0, SMOOTHING).unwrap();

        assert!(!second.created);
        assert_eq!(second.observation_count, 2);
        // 0.6 + 0.3·(1−0.6)·1.0 = 0.72 — not 1.6
        assert!((second.strength - 0.72).abs() < 1e-9);

        // Only one row exists
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn strength_is_monotone_and_bounded_under_repetition() {
        let conn = test_conn();
        let mut last = 0.0;
        for _ in 0..50 {
            let receipt =
                record_relationship(&conn, "a", "b", "co_changed", 0.9, SMOOTHING).unwrap();
            assert!(receipt.strength >= last);
            assert!(receipt.strength <= 1.0);
            last = receipt.strength;
        }
        assert!(last > 0.95); // approaches 1.0 without reaching past it
    }

    #[test]
    fn validation_rejects_bad_input() {
        let conn = test_conn();
        assert!(record_relationship(&conn, "", "b", "t", 0.5, SMOOTHING).is_err());
        assert!(record_relationship(&conn, "a", "a", "t", 0.5, SMOOTHING).is_err());
        assert!(record_relationship(&conn, "a", "b", "", 0.5, SMOOTHING).is_err());
        assert!(record_relationship(&conn, "a", "b", "t", 1.5, SMOOTHING).is_err());
    }

    #[test]
    fn get_relationships_matches_either_end() {
        let conn = test_conn();
        record_relationship(&conn, "src/a.rs", "src/b.rs", "co_changed", 0.8, SMOOTHING).unwrap();
        record_relationship(&conn, "src/c.rs", "src/a.rs", "imports", 0.4, SMOOTHING).unwrap();
        record_relationship(&conn, "src/x.rs", "src/y.rs", "co_changed", 0.9, SMOOTHING).unwrap();

        let edges = get_relationships(&conn, "src/a.rs", &[], 0.0).unwrap();
        assert_eq!(edges.len(), 2);
        // Strongest first
        assert_eq!(edges[0].relationship_type, "co_changed");
        assert!(edges.iter().all(|e| e.touches("src/a.rs")));
    }

    #[test]
    fn type_and_strength_filters_apply() {
        let conn = test_conn();
        record_relationship(&conn, "a", "b", "co_changed", 0.8, SMOOTHING).unwrap();
        record_relationship(&conn, "a", "c", "imports", 0.3, SMOOTHING).unwrap();

        let typed =
            get_relationships(&conn, "a", &["imports".to_string()], 0.0).unwrap();
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].object, "c");

        let strong = get_relationships(&conn, "a", &[], 0.5).unwrap();
        assert_eq!(strong.len(), 1);
        assert_eq!(strong[0].object, "b");
    }
}
