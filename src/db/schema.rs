//! SQL DDL for the knowledge graph tables.
//!
//! Defines the `patterns`, `patterns_fts` (FTS5), `relationships`,
//! `pattern_conversations`, `pattern_log`, and `schema_meta` tables. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for the Tier 2 store.
const SCHEMA_SQL: &str = r#"
-- Learned patterns
CREATE TABLE IF NOT EXISTS patterns (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    context TEXT NOT NULL DEFAULT '{}',
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_used_at TEXT NOT NULL,
    decayed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category);
CREATE INDEX IF NOT EXISTS idx_patterns_confidence ON patterns(confidence);
CREATE INDEX IF NOT EXISTS idx_patterns_last_used ON patterns(last_used_at);

-- Full-text search over title + context (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS patterns_fts USING fts5(
    title,
    context,
    id UNINDEXED,
    content='patterns',
    content_rowid='rowid'
);

-- Typed edges between file-like identifiers
CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    object TEXT NOT NULL,
    relationship_type TEXT NOT NULL,
    strength REAL NOT NULL CHECK(strength >= 0.0 AND strength <= 1.0),
    observation_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    decayed_at TEXT,
    UNIQUE(subject, object, relationship_type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_subject ON relationships(subject);
CREATE INDEX IF NOT EXISTS idx_relationships_object ON relationships(object);
CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(relationship_type);

-- Non-owning back-references into Tier 1 (conversation ids are opaque here)
CREATE TABLE IF NOT EXISTS pattern_conversations (
    pattern_id TEXT NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
    conversation_id TEXT NOT NULL,
    linked_at TEXT NOT NULL,
    PRIMARY KEY (pattern_id, conversation_id)
);

-- Audit log
CREATE TABLE IF NOT EXISTS pattern_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','boost','decay','prune','link','relate')),
    pattern_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"patterns".to_string()));
        assert!(tables.contains(&"relationships".to_string()));
        assert!(tables.contains(&"pattern_conversations".to_string()));
        assert!(tables.contains(&"pattern_log".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));

        // FTS5 virtual table answers queries
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM patterns_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn confidence_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO patterns (id, title, category, confidence, created_at, last_used_at) \
             VALUES ('x', 'bad', 'test', 1.5, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
