//! Tier 2 read path — ranked lexical pattern search.
//!
//! FTS5 BM25 candidates are folded through a reciprocal-rank form and blended
//! with confidence and usage into a single ordering key. Reads never touch
//! `last_used_at` or `usage_count` — the decay clock is driven purely by
//! explicit reuse (`boost`), so a search sweep cannot keep a dead pattern
//! alive.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::error::Result;
use crate::graph::store::map_pattern_row;
use crate::graph::types::Pattern;

/// Reciprocal-rank constant for folding FTS rank positions into [0, 1].
const RRF_K: f64 = 60.0;

/// Filters applied after candidate retrieval.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    pub category: Option<String>,
    pub min_confidence: f64,
}

/// A search hit with its lexical match component and final ordering key.
#[derive(Debug, Clone, Serialize)]
pub struct RankedPattern {
    pub pattern: Pattern,
    /// Lexical match strength in [0, 1]; 0 in browse mode (empty query).
    pub match_score: f64,
    /// Blended ordering key: match, confidence, and usage weighted together.
    pub score: f64,
}

/// Ranked search over `title` + `context`.
///
/// With an empty query, all patterns are candidates and ranking falls back to
/// confidence and usage alone. The blend is monotonic in confidence: an
/// otherwise-identical pattern with higher confidence never ranks below a
/// lower-confidence one. Ties break toward the more recently used.
pub fn search_patterns(
    conn: &Connection,
    query: &str,
    filter: &PatternFilter,
    limit: usize,
    scoring: &ScoringConfig,
) -> Result<Vec<RankedPattern>> {
    let candidate_limit = limit.max(1) * 3;
    let candidates = match build_match_expr(query) {
        Some(expr) => fts_candidates(conn, &expr, candidate_limit)?,
        None => browse_candidates(conn, candidate_limit)?,
    };

    let mut ranked: Vec<RankedPattern> = Vec::new();
    for (pattern, match_score) in candidates {
        if let Some(ref category) = filter.category {
            if &pattern.category != category {
                continue;
            }
        }
        if pattern.confidence < filter.min_confidence {
            continue;
        }
        let usage_norm = (pattern.usage_count.min(10) as f64) / 10.0;
        let score = scoring.match_weight * match_score
            + scoring.confidence_weight * pattern.confidence
            + scoring.usage_weight * usage_norm;
        ranked.push(RankedPattern {
            pattern,
            match_score,
            score,
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.pattern.last_used_at.cmp(&a.pattern.last_used_at))
    });
    ranked.truncate(limit);
    Ok(ranked)
}

/// Sanitize free text into an FTS5 OR-query. Returns `None` for a query with
/// no indexable terms (browse mode).
fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// BM25-ordered FTS candidates with rank positions folded to [0, 1].
fn fts_candidates(
    conn: &Connection,
    match_expr: &str,
    limit: usize,
) -> Result<Vec<(Pattern, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM patterns_fts WHERE patterns_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let ids: Vec<String> = stmt
        .query_map(params![match_expr, limit as i64], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        if let Some(pattern) = fetch_pattern(conn, id)? {
            let match_score = RRF_K / (RRF_K + position as f64);
            out.push((pattern, match_score));
        }
    }
    Ok(out)
}

/// Browse mode: all patterns by confidence, zero match component.
fn browse_candidates(conn: &Connection, limit: usize) -> Result<Vec<(Pattern, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, category, confidence, context, usage_count, created_at, last_used_at \
         FROM patterns ORDER BY confidence DESC, last_used_at DESC LIMIT ?1",
    )?;
    let patterns = stmt
        .query_map(params![limit as i64], map_pattern_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(patterns.into_iter().map(|p| (p, 0.0)).collect())
}

fn fetch_pattern(conn: &Connection, id: &str) -> Result<Option<Pattern>> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row(
            "SELECT id, title, category, confidence, context, usage_count, created_at, last_used_at \
             FROM patterns WHERE id = ?1",
            params![id],
            map_pattern_row,
        )
        .optional()?)
}
