//! End-to-end tests for lexical, semantic, and hybrid search.

use serde_json::json;
use thingdb_rs::{Db, HybridOptions, SearchOptions};

async fn seed_docs(db: &Db) {
    db.create("Doc", Some("pasta"), json!({ "body": "pasta" })).await.unwrap();
    db.create("Doc", Some("cooking"), json!({ "body": "cooking italian food" })).await.unwrap();
    db.create("Doc", Some("guide"), json!({ "body": "typescript guide" })).await.unwrap();
}

fn doc_schema() -> serde_json::Value {
    json!({ "Doc": { "body": "string" } })
}

// ============================================================================
// 1. Semantic vs. lexical ranking
// ============================================================================

#[tokio::test]
async fn test_semantic_ranks_by_domain_without_literal_overlap() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    seed_docs(&db).await;

    // No document contains "antonio" or "restaurant" literally.
    let lexical = db
        .search("Doc", "antonio's restaurant", SearchOptions::default())
        .await
        .unwrap();
    assert!(lexical.is_empty());

    let semantic = db
        .semantic_search("Doc", "antonio's restaurant", SearchOptions::default())
        .await
        .unwrap();
    let rank_of = |id: &str| {
        semantic
            .iter()
            .position(|doc| doc["$id"].as_str() == Some(id))
            .unwrap_or(usize::MAX)
    };
    // The cooking document outranks the typescript guide on meaning alone.
    assert!(rank_of("cooking") < rank_of("guide"));
    assert!(rank_of("pasta") < rank_of("guide"));
}

// ============================================================================
// 2. Lexical scoring rewards earlier matches
// ============================================================================

#[tokio::test]
async fn test_lexical_search_scores_by_position() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    db.create("Doc", Some("lead"), json!({ "body": "rust storage engine" })).await.unwrap();
    db.create("Doc", Some("trail"), json!({ "body": "a storage engine in rust" }))
        .await
        .unwrap();

    let results = db.search("Doc", "rust", SearchOptions::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["$id"], json!("lead"));
    let lead_score = results[0]["$score"].as_f64().unwrap();
    let trail_score = results[1]["$score"].as_f64().unwrap();
    assert!(lead_score > trail_score);
}

// ============================================================================
// 3. Cosine bounds
// ============================================================================

#[tokio::test]
async fn test_semantic_scores_are_bounded_and_reflexive() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    seed_docs(&db).await;

    let results = db
        .semantic_search("Doc", "cooking italian food", SearchOptions::default())
        .await
        .unwrap();
    for doc in &results {
        let score = doc["$score"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&score), "score {score} out of range");
    }
    // The query equals the cooking doc's embedded text: similarity 1.
    let exact = results.iter().find(|d| d["$id"] == json!("cooking")).unwrap();
    assert!(exact["$score"].as_f64().unwrap() > 0.9999);
}

// ============================================================================
// 4. Hybrid RRF fusion
// ============================================================================

#[tokio::test]
async fn test_hybrid_carries_ranks_and_fused_score() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    seed_docs(&db).await;

    let results = db
        .hybrid_search("Doc", "cooking italian food", HybridOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());

    let top = &results[0];
    assert_eq!(top["$id"], json!("cooking"));
    assert!(top["$rrfScore"].as_f64().unwrap() > 0.0);
    assert_eq!(top["$ftsRank"], json!(1));
    assert_eq!(top["$semanticRank"], json!(1));
    assert!(top["$score"].as_f64().is_some());

    // Fused scores are sorted descending.
    let scores: Vec<f64> = results.iter().map(|d| d["$rrfScore"].as_f64().unwrap()).collect();
    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(scores, sorted);
}

#[tokio::test]
async fn test_hybrid_includes_semantic_only_matches() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    seed_docs(&db).await;

    // No lexical hit anywhere, so every ranked result is semantic-only.
    let results = db
        .hybrid_search("Doc", "restaurant dinner", HybridOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    for doc in &results {
        assert!(doc.get("$ftsRank").is_none());
        assert!(doc["$semanticRank"].as_u64().is_some());
    }
}

// ============================================================================
// 5. Field selection and limits
// ============================================================================

#[tokio::test]
async fn test_search_restricted_to_fields() {
    let db = Db::open_memory(&json!({
        "Doc": { "title": "string", "body": "string" }
    }))
    .unwrap();
    db.create("Doc", Some("a"), json!({ "title": "alpha", "body": "needle" })).await.unwrap();
    db.create("Doc", Some("b"), json!({ "title": "needle", "body": "beta" })).await.unwrap();

    let title_only = db
        .search(
            "Doc",
            "needle",
            SearchOptions { fields: Some(vec!["title".into()]), ..SearchOptions::default() },
        )
        .await
        .unwrap();
    assert_eq!(title_only.len(), 1);
    assert_eq!(title_only[0]["$id"], json!("b"));

    let limited = db
        .search(
            "Doc",
            "needle",
            SearchOptions { limit: Some(1), ..SearchOptions::default() },
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

// ============================================================================
// 6. Embeddings refresh with content
// ============================================================================

#[tokio::test]
async fn test_update_moves_document_in_semantic_space() {
    let db = Db::open_memory(&doc_schema()).unwrap();
    db.create("Doc", Some("d"), json!({ "body": "typescript guide" })).await.unwrap();

    let before = db
        .semantic_search("Doc", "pasta dinner", SearchOptions::default())
        .await
        .unwrap();
    let score_before = before[0]["$score"].as_f64().unwrap();

    db.update("Doc", "d", json!({ "body": "pasta dinner recipe" })).await.unwrap();
    let after = db
        .semantic_search("Doc", "pasta dinner", SearchOptions::default())
        .await
        .unwrap();
    let score_after = after[0]["$score"].as_f64().unwrap();
    assert!(score_after > score_before);
}
