//! # Search core
//!
//! Lexical substring scoring, deterministic semantic embeddings, and
//! reciprocal-rank fusion for hybrid ranking. The provider decides what
//! to search; this module only scores and fuses.

pub mod embedding;

use serde_json::Value;

pub use embedding::{content_hash, cosine, embed, similarity_score, tokenize, DIMENSIONS};

/// Result-decoration keys attached to flat entities.
pub const SCORE_KEY: &str = "$score";
pub const RRF_SCORE_KEY: &str = "$rrfScore";
pub const FTS_RANK_KEY: &str = "$ftsRank";
pub const SEMANTIC_RANK_KEY: &str = "$semanticRank";

// ============================================================================
// Options
// ============================================================================

/// Options shared by lexical and semantic search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict scoring to these fields; `None` auto-detects text fields.
    pub fields: Option<Vec<String>>,
    /// Results must score strictly above this.
    pub min_score: f64,
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { fields: None, min_score: 0.0, limit: None }
    }
}

/// Hybrid (RRF) search options.
#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub k: f64,
    pub fts_weight: f64,
    pub semantic_weight: f64,
    pub min_score: f64,
    pub limit: Option<usize>,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self { k: 60.0, fts_weight: 0.5, semantic_weight: 0.5, min_score: 0.0, limit: None }
    }
}

// ============================================================================
// Lexical scoring
// ============================================================================

/// Substring match score: `1 - index/length`, 0.0 when absent.
/// An earlier match in a shorter document scores higher.
pub fn lexical_score(haystack: &str, needle: &str) -> f64 {
    if haystack.is_empty() || needle.is_empty() {
        return 0.0;
    }
    let haystack = haystack.to_lowercase();
    let needle = needle.to_lowercase();
    match haystack.find(&needle) {
        Some(idx) => 1.0 - idx as f64 / haystack.len() as f64,
        None => 0.0,
    }
}

// ============================================================================
// Reciprocal rank fusion
// ============================================================================

/// `rrf = ftsWeight/(k+ftsRank) + semanticWeight/(k+semanticRank)`.
/// Ranks are 1-based; an absent rank contributes nothing (rank = ∞).
pub fn rrf_score(
    fts_rank: Option<usize>,
    semantic_rank: Option<usize>,
    k: f64,
    fts_weight: f64,
    semantic_weight: f64,
) -> f64 {
    let fts = fts_rank.map_or(0.0, |r| fts_weight / (k + r as f64));
    let semantic = semantic_rank.map_or(0.0, |r| semantic_weight / (k + r as f64));
    fts + semantic
}

// ============================================================================
// Text extraction
// ============================================================================

/// Fields that participate in embedding/search when none are configured:
/// string or string-array values whose key is not `$`/`_`-prefixed and
/// does not end in `At` (timestamps).
pub fn embeddable_fields(entity: &Value) -> Vec<String> {
    let Some(obj) = entity.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .filter(|(k, v)| is_embeddable_key(k) && is_texty(v))
        .map(|(k, _)| k.clone())
        .collect()
}

fn is_embeddable_key(key: &str) -> bool {
    !key.starts_with('$') && !key.starts_with('_') && !key.ends_with("At")
}

fn is_texty(v: &Value) -> bool {
    match v {
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(Value::is_string) && !items.is_empty(),
        _ => false,
    }
}

/// Serialize an entity (or a chosen set of its fields) to search text.
pub fn searchable_text(entity: &Value, fields: Option<&[String]>) -> String {
    let Some(obj) = entity.as_object() else {
        return String::new();
    };
    let auto;
    let names: &[String] = match fields {
        Some(f) => f,
        None => {
            auto = embeddable_fields(entity);
            &auto
        }
    };
    let mut parts = Vec::new();
    for name in names {
        match obj.get(name) {
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(Value::Array(items)) => {
                parts.extend(items.iter().filter_map(Value::as_str).map(str::to_owned));
            }
            Some(Value::Number(n)) => parts.push(n.to_string()),
            Some(Value::Bool(b)) => parts.push(b.to_string()),
            _ => {}
        }
    }
    parts.join(" ")
}
