//! End-to-end tests for event emission, pattern subscriptions, and replay.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use thingdb_rs::{Db, EventFilter, EventInput};

fn schema() -> serde_json::Value {
    json!({
        "Post":   { "title": "string" },
        "Author": { "name": "string" }
    })
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&thingdb_rs::Event) + Send + Sync + 'static) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (log, move |event: &thingdb_rs::Event| sink.lock().push(event.event.clone()))
}

// ============================================================================
// 1. Pattern matching across subscriptions
// ============================================================================

#[tokio::test]
async fn test_subscription_patterns() {
    let db = Db::open_memory(&schema()).unwrap();

    let (post_events, post_handler) = recorder();
    let (created_events, created_handler) = recorder();
    let (all_events, all_handler) = recorder();
    db.on("Post.*", Arc::new(post_handler)).unwrap();
    db.on("*.created", Arc::new(created_handler)).unwrap();
    db.on("*", Arc::new(all_handler)).unwrap();

    db.create("Post", Some("p1"), json!({ "title": "Hello" })).await.unwrap();
    db.update("Post", "p1", json!({ "title": "Hello again" })).await.unwrap();
    db.create("Author", Some("a1"), json!({ "name": "Ada" })).await.unwrap();

    // Post.* sees created and updated, not Author.created.
    assert_eq!(*post_events.lock(), vec!["Post.created", "Post.updated"]);

    // *.created sees both created events.
    assert_eq!(*created_events.lock(), vec!["Post.created", "Author.created"]);

    // * sees everything.
    assert_eq!(
        *all_events.lock(),
        vec!["Post.created", "Post.updated", "Author.created"]
    );
}

// ============================================================================
// 2. Legacy and modern emit forms
// ============================================================================

#[tokio::test]
async fn test_emit_forms() {
    let db = Db::open_memory(&schema()).unwrap();

    let legacy = db
        .emit(EventInput::legacy("Cache.flushed", Some(json!({ "entries": 10 }))))
        .await
        .unwrap();
    assert_eq!(legacy.event, "Cache.flushed");
    assert_eq!(legacy.actor, "system");
    assert_eq!(legacy.object_data, Some(json!({ "entries": 10 })));

    let modern = db
        .emit(
            EventInput::named("Post.published")
                .actor("editor-1")
                .object("Post/p1")
                .meta(json!({ "channel": "rss" })),
        )
        .await
        .unwrap();
    assert_eq!(modern.actor, "editor-1");
    assert_eq!(modern.object.as_deref(), Some("Post/p1"));

    // Empty names are rejected synchronously.
    assert!(db.emit(EventInput::named("")).await.is_err());
}

// ============================================================================
// 3. Listing and replay
// ============================================================================

#[tokio::test]
async fn test_list_and_replay_events() {
    let db = Db::open_memory(&schema()).unwrap();
    db.create("Post", Some("p1"), json!({ "title": "One" })).await.unwrap();
    db.create("Post", Some("p2"), json!({ "title": "Two" })).await.unwrap();
    db.create("Author", Some("a1"), json!({ "name": "Ada" })).await.unwrap();

    let post_created = db
        .list_events(EventFilter::pattern("Post.created"))
        .await
        .unwrap();
    assert_eq!(post_created.len(), 2);

    // A late subscriber can have history replayed at it.
    let (seen, handler) = recorder();
    db.on("Post.created", Arc::new(handler)).unwrap();
    let replayed = db.replay_events(EventFilter::pattern("Post.created")).await.unwrap();
    assert_eq!(replayed, 2);
    assert_eq!(seen.lock().len(), 2);
}

// ============================================================================
// 4. Relation and deletion events
// ============================================================================

#[tokio::test]
async fn test_relation_and_delete_events() {
    let db = Db::open_memory(&json!({
        "Post":   { "author": "Author.posts" },
        "Author": { "name": "string" }
    }))
    .unwrap();
    db.create("Post", Some("p1"), json!({})).await.unwrap();
    db.create("Author", Some("a1"), json!({ "name": "Ada" })).await.unwrap();

    let (seen, handler) = recorder();
    db.on("*", Arc::new(handler)).unwrap();

    db.relate("Post", "p1", "author", "Author", "a1", Some(json!({ "matchMode": "exact" })))
        .await
        .unwrap();
    db.unrelate("Post", "p1", "author", "Author", "a1").await.unwrap();
    db.delete("Post", "p1").await.unwrap();

    assert_eq!(
        *seen.lock(),
        vec!["Relation.created", "Relation.deleted", "Post.deleted"]
    );

    // Relation metadata rides on the event.
    let relation_events = db
        .list_events(EventFilter::pattern("Relation.created"))
        .await
        .unwrap();
    assert_eq!(relation_events[0].meta, Some(json!({ "matchMode": "exact" })));
}
