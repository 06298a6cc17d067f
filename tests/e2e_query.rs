//! End-to-end tests for deferred queries: lazy projection, map with
//! batched relation hydration, and the no-hydration fast path.
//!
//! Provider reads are counted through a delegating wrapper so the tests
//! can assert exactly how many `get`s hydration issues.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use thingdb_rs::{
    Db, ListOptions, MemoryProvider, Provider, ProviderCapabilities, Result, SearchOptions,
};

// ============================================================================
// Counting provider wrapper
// ============================================================================

struct CountingProvider {
    inner: MemoryProvider,
    gets: AtomicUsize,
}

impl CountingProvider {
    fn new() -> Self {
        Self { inner: MemoryProvider::new(), gets: AtomicUsize::new(0) }
    }

    fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.gets.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for CountingProvider {
    async fn get(&self, ty: &str, id: &str) -> Result<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(ty, id).await
    }

    async fn list(&self, ty: &str, options: ListOptions) -> Result<Vec<Value>> {
        self.inner.list(ty, options).await
    }

    async fn create(&self, ty: &str, id: Option<&str>, data: Value) -> Result<Value> {
        self.inner.create(ty, id, data).await
    }

    async fn update(&self, ty: &str, id: &str, data: Value) -> Result<Value> {
        self.inner.update(ty, id, data).await
    }

    async fn delete(&self, ty: &str, id: &str) -> Result<bool> {
        self.inner.delete(ty, id).await
    }

    async fn related(&self, ty: &str, id: &str, relation: &str) -> Result<Vec<Value>> {
        self.inner.related(ty, id, relation).await
    }

    async fn relate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
        meta: Option<Value>,
    ) -> Result<()> {
        self.inner.relate(from_ty, from_id, relation, to_ty, to_id, meta).await
    }

    async fn unrelate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
    ) -> Result<()> {
        self.inner.unrelate(from_ty, from_id, relation, to_ty, to_id).await
    }

    async fn search(&self, ty: &str, query: &str, options: SearchOptions) -> Result<Vec<Value>> {
        self.inner.search(ty, query, options).await
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.inner.capabilities()
    }
}

fn customer_schema() -> Value {
    json!({
        "Customer": { "name": "string", "address": "Address.customers" },
        "Address":  { "city": "string", "country": "Country.addresses" },
        "Country":  { "name": "string" }
    })
}

async fn seed_customers(db: &Db) {
    for (i, name) in ["A", "B", "C"].iter().enumerate() {
        db.create("Address", Some(&format!("addr-{i}")), json!({ "city": format!("C{}", i + 1) }))
            .await
            .unwrap();
        db.create(
            "Customer",
            Some(&format!("cust-{i}")),
            json!({ "name": name, "address": format!("addr-{i}") }),
        )
        .await
        .unwrap();
    }
}

// ============================================================================
// 1. Lazy projection & map hydration (one get per distinct id)
// ============================================================================

#[tokio::test]
async fn test_map_hydrates_with_exactly_one_get_per_unique_id() {
    let provider = Arc::new(CountingProvider::new());
    let db = Db::with_provider(&customer_schema(), Arc::clone(&provider) as Arc<dyn Provider>)
        .unwrap();
    seed_customers(&db).await;
    provider.reset();

    let result = db
        .query("Customer")
        .sort(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
        .map(|customer, _| {
            Ok(json!({
                "name": customer.get("name").into_value(),
                "city": customer.get("address").get("city").into_value(),
            }))
        })
        .resolve()
        .await
        .unwrap();

    // Three distinct address ids: exactly three provider gets.
    assert_eq!(provider.get_count(), 3);
    assert_eq!(
        result,
        json!([
            { "name": "A", "city": "C1" },
            { "name": "B", "city": "C2" },
            { "name": "C", "city": "C3" },
        ])
    );
}

#[tokio::test]
async fn test_shared_relation_ids_deduplicate() {
    let provider = Arc::new(CountingProvider::new());
    let db = Db::with_provider(&customer_schema(), Arc::clone(&provider) as Arc<dyn Provider>)
        .unwrap();

    db.create("Address", Some("hq"), json!({ "city": "Rome" })).await.unwrap();
    for i in 0..5 {
        db.create(
            "Customer",
            Some(&format!("c{i}")),
            json!({ "name": format!("n{i}"), "address": "hq" }),
        )
        .await
        .unwrap();
    }
    provider.reset();

    let cities = db
        .query("Customer")
        .map(|c, _| Ok(c.get("address").get("city").into_value()))
        .resolve()
        .await
        .unwrap();

    // Five customers, one distinct address: one get.
    assert_eq!(provider.get_count(), 1);
    assert_eq!(cities.as_array().unwrap().len(), 5);
    assert!(cities.as_array().unwrap().iter().all(|c| c == &json!("Rome")));
}

// ============================================================================
// 2. Nested relation hydration
// ============================================================================

#[tokio::test]
async fn test_nested_relations_hydrate_recursively() {
    let provider = Arc::new(CountingProvider::new());
    let db = Db::with_provider(&customer_schema(), Arc::clone(&provider) as Arc<dyn Provider>)
        .unwrap();

    db.create("Country", Some("it"), json!({ "name": "Italy" })).await.unwrap();
    db.create("Address", Some("a1"), json!({ "city": "Rome", "country": "it" })).await.unwrap();
    db.create("Address", Some("a2"), json!({ "city": "Milan", "country": "it" })).await.unwrap();
    db.create("Customer", Some("c1"), json!({ "name": "A", "address": "a1" })).await.unwrap();
    db.create("Customer", Some("c2"), json!({ "name": "B", "address": "a2" })).await.unwrap();
    provider.reset();

    let result = db
        .query("Customer")
        .sort(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
        .map(|c, _| {
            Ok(json!({
                "city": c.get("address").get("city").into_value(),
                "country": c.get("address").get("country").get("name").into_value(),
            }))
        })
        .resolve()
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([
            { "city": "Rome", "country": "Italy" },
            { "city": "Milan", "country": "Italy" },
        ])
    );
    // Two addresses + one (deduplicated) country.
    assert_eq!(provider.get_count(), 3);
}

// ============================================================================
// 3. No-relation callbacks never touch the provider
// ============================================================================

#[tokio::test]
async fn test_plain_map_and_shape_transforms_issue_no_gets() {
    let provider = Arc::new(CountingProvider::new());
    let db = Db::with_provider(&customer_schema(), Arc::clone(&provider) as Arc<dyn Provider>)
        .unwrap();
    seed_customers(&db).await;
    provider.reset();

    let names = db
        .query("Customer")
        .filter(|c| c["name"].as_str() != Some("B"))
        .sort(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
        .limit(5)
        .map(|c, _| Ok(c.get("name").into_value()))
        .resolve()
        .await
        .unwrap();

    assert_eq!(names, json!(["A", "C"]));
    assert_eq!(provider.get_count(), 0);
}

// ============================================================================
// 4. Relation arrays hydrate element-wise
// ============================================================================

#[tokio::test]
async fn test_relation_array_hydration() {
    let provider = Arc::new(CountingProvider::new());
    let db = Db::with_provider(
        &json!({
            "Author": { "posts": "Post[]" },
            "Post":   { "title": "string" }
        }),
        Arc::clone(&provider) as Arc<dyn Provider>,
    )
    .unwrap();

    db.create("Post", Some("p1"), json!({ "title": "One" })).await.unwrap();
    db.create("Post", Some("p2"), json!({ "title": "Two" })).await.unwrap();
    db.create("Author", Some("ada"), json!({ "name": "Ada", "posts": ["p1", "p2"] }))
        .await
        .unwrap();
    provider.reset();

    let result = db
        .query("Author")
        .map(|author, _| {
            let posts = author.get("posts");
            let titles: Vec<Value> = posts
                .value()
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|p| p.get("title").cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .unwrap_or_default();
            Ok(json!(titles))
        })
        .resolve()
        .await
        .unwrap();

    assert_eq!(provider.get_count(), 2);
    assert_eq!(result, json!([["One", "Two"]]));
}

// ============================================================================
// 5. Deferred single-entity queries and path projection
// ============================================================================

#[tokio::test]
async fn test_query_one_and_path_projection() {
    let db = Db::open_memory(&customer_schema()).unwrap();
    db.create("Customer", Some("c1"), json!({ "name": "Ada", "address": "a1" })).await.unwrap();

    let name = db.query_one("Customer", "c1").get("name").resolve().await.unwrap();
    assert_eq!(name, json!("Ada"));

    // Missing entity resolves to null, and path access short-circuits.
    let missing = db.query_one("Customer", "ghost").select("name").resolve().await.unwrap();
    assert_eq!(missing, Value::Null);
}

#[tokio::test]
async fn test_first_on_filtered_query() {
    let db = Db::open_memory(&customer_schema()).unwrap();
    seed_customers(&db).await;

    let first = db
        .query("Customer")
        .sort(|a, b| a["name"].as_str().cmp(&b["name"].as_str()))
        .first()
        .get("name")
        .resolve()
        .await
        .unwrap();
    assert_eq!(first, json!("A"));

    let none = db
        .query("Customer")
        .filter(|c| c["name"].as_str() == Some("Z"))
        .first()
        .resolve()
        .await
        .unwrap();
    assert_eq!(none, Value::Null);
}
