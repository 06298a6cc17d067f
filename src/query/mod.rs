//! # Deferred query
//!
//! A `DeferredQuery` is a chainable, access-tracking future of a provider
//! read. Nothing executes until the first `resolve().await`; the result is
//! memoised, so later awaits answer synchronously and the underlying
//! executor runs exactly once.
//!
//! Chaining `get` walks a property path off the parent's resolution
//! (`None`/null short-circuits to null — no implicit mapping over
//! arrays). `filter`/`sort`/`limit`/`first` are pure shape transforms.
//! `map` is the interesting one: its callback is run through a recording
//! pass to discover relation access, related entities are batch-loaded
//! with deduplication, and the callback reruns over enriched items.

pub mod hydrate;
pub mod recording;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashSet;
use tokio::sync::OnceCell;

use crate::bulk::{self, ForEachOptions, ForEachReport, ItemFn};
use crate::model::thing::type_of;
use crate::provider::Provider;
use crate::schema::RelationInfo;
use crate::{Error, Result};

pub use recording::{FieldView, ItemView};

/// Map callback: runs once to record access, once for real.
pub type MapFn = Arc<dyn Fn(&ItemView<'_>, usize) -> Result<Value> + Send + Sync>;

type Executor = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

// ============================================================================
// Query context
// ============================================================================

/// What a query needs besides its executor: a provider for hydration and
/// the schema's relation table.
#[derive(Clone)]
pub struct QueryContext {
    pub provider: Option<Arc<dyn Provider>>,
    pub relations: Arc<RelationInfo>,
}

impl QueryContext {
    pub fn new(provider: Arc<dyn Provider>, relations: Arc<RelationInfo>) -> Self {
        Self { provider: Some(provider), relations }
    }

    /// A context with no provider and no schema — for queries over plain
    /// values that never hydrate.
    pub fn detached() -> Self {
        Self { provider: None, relations: Arc::new(RelationInfo::default()) }
    }
}

// ============================================================================
// DeferredQuery
// ============================================================================

/// A chainable, memoising future of a value.
pub struct DeferredQuery {
    inner: Arc<QueryInner>,
}

impl Clone for DeferredQuery {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct QueryInner {
    ty: Option<String>,
    executor: Mutex<Option<Executor>>,
    cell: OnceCell<Result<Value>>,
    parent: Option<DeferredQuery>,
    path: SmallVec<[String; 4]>,
    accessed: Mutex<HashSet<String>>,
    ctx: QueryContext,
}

impl DeferredQuery {
    /// A root query with an executor that runs on first resolution.
    pub fn new<F, Fut>(ty: Option<String>, ctx: QueryContext, executor: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            inner: Arc::new(QueryInner {
                ty,
                executor: Mutex::new(Some(Box::new(move || executor().boxed()))),
                cell: OnceCell::new(),
                parent: None,
                path: SmallVec::new(),
                accessed: Mutex::new(HashSet::new()),
                ctx,
            }),
        }
    }

    /// A query already holding its value.
    pub fn of_value(ty: Option<String>, ctx: QueryContext, value: Value) -> Self {
        Self::new(ty, ctx, move || async move { Ok(value) })
    }

    fn child(&self, path: SmallVec<[String; 4]>) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                ty: None,
                executor: Mutex::new(None),
                cell: OnceCell::new(),
                parent: Some(self.clone()),
                path,
                accessed: Mutex::new(HashSet::new()),
                ctx: self.inner.ctx.clone(),
            }),
        }
    }

    /// Entity type this query roots at, if known.
    pub fn query_type(&self) -> Option<&str> {
        self.inner.ty.as_deref()
    }

    /// Fields accessed through `get`/`select`, for schema inference.
    pub fn accessed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.inner.accessed.lock().iter().cloned().collect();
        fields.sort();
        fields
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolve, running the executor at most once. Subsequent calls
    /// return the memoised value (or error).
    pub async fn resolve(&self) -> Result<Value> {
        self.resolve_boxed().await
    }

    fn resolve_boxed(&self) -> BoxFuture<'static, Result<Value>> {
        let this = self.clone();
        async move {
            this.inner
                .cell
                .get_or_init(|| async {
                    match &this.inner.parent {
                        Some(parent) => {
                            let base = parent.resolve_boxed().await?;
                            Ok(walk_path(&base, &this.inner.path))
                        }
                        None => {
                            let executor = { this.inner.executor.lock().take() };
                            match executor {
                                Some(run) => run().await,
                                None => Err(Error::ExecutionError(
                                    "deferred query has no executor".into(),
                                )),
                            }
                        }
                    }
                })
                .await
                .clone()
        }
        .boxed()
    }

    /// Resolve and require an array.
    pub async fn resolve_array(&self) -> Result<Vec<Value>> {
        match self.resolve().await? {
            Value::Array(items) => Ok(items),
            other => Err(Error::TypeError { expected: "array".into(), got: type_of(&other).into() }),
        }
    }

    // ========================================================================
    // Property access
    // ========================================================================

    /// A child query rooted at the same source with one more path
    /// segment. The access is tracked on this instance.
    pub fn get(&self, field: &str) -> DeferredQuery {
        self.inner.accessed.lock().insert(field.to_owned());
        self.child(SmallVec::from_iter([field.to_owned()]))
    }

    /// Like `get` but takes a dotted path (`"address.city"`).
    pub fn select(&self, path: &str) -> DeferredQuery {
        let segments: SmallVec<[String; 4]> = path.split('.').map(str::to_owned).collect();
        if let Some(first) = segments.first() {
            self.inner.accessed.lock().insert(first.clone());
        }
        self.child(segments)
    }

    // ========================================================================
    // Shape transforms (no hydration)
    // ========================================================================

    fn derived<F>(&self, f: F) -> DeferredQuery
    where
        F: FnOnce(Value) -> Result<Value> + Send + 'static,
    {
        let parent = self.clone();
        DeferredQuery::new(self.inner.ty.clone(), self.inner.ctx.clone(), move || async move {
            f(parent.resolve().await?)
        })
    }

    /// First element of an array (null sentinel when empty); any other
    /// value passes through unchanged.
    pub fn first(&self) -> DeferredQuery {
        self.derived(|value| match value {
            Value::Array(items) => Ok(items.into_iter().next().unwrap_or(Value::Null)),
            other => Ok(other),
        })
    }

    pub fn filter<F>(&self, pred: F) -> DeferredQuery
    where
        F: Fn(&Value) -> bool + Send + 'static,
    {
        self.derived(move |value| match value {
            Value::Array(items) => Ok(Value::Array(items.into_iter().filter(|v| pred(v)).collect())),
            other => Err(Error::TypeError { expected: "array".into(), got: type_of(&other).into() }),
        })
    }

    pub fn sort<F>(&self, cmp: F) -> DeferredQuery
    where
        F: Fn(&Value, &Value) -> std::cmp::Ordering + Send + 'static,
    {
        self.derived(move |value| match value {
            Value::Array(mut items) => {
                items.sort_by(|a, b| cmp(a, b));
                Ok(Value::Array(items))
            }
            other => Err(Error::TypeError { expected: "array".into(), got: type_of(&other).into() }),
        })
    }

    pub fn limit(&self, n: usize) -> DeferredQuery {
        self.derived(move |value| match value {
            Value::Array(mut items) => {
                items.truncate(n);
                Ok(Value::Array(items))
            }
            other => Err(Error::TypeError { expected: "array".into(), got: type_of(&other).into() }),
        })
    }

    // ========================================================================
    // Map with batch hydration
    // ========================================================================

    /// Map over a resolved array. The callback runs through a recording
    /// pass first; any relations it reads are batch-loaded (deduplicated,
    /// in parallel) before the real pass. A callback that touches no
    /// relation runs with plain array semantics and no provider calls.
    pub fn map<F>(&self, cb: F) -> DeferredQuery
    where
        F: Fn(&ItemView<'_>, usize) -> Result<Value> + Send + Sync + 'static,
    {
        self.map_arc(Arc::new(cb))
    }

    pub fn map_arc(&self, cb: MapFn) -> DeferredQuery {
        let parent = self.clone();
        let ctx = self.inner.ctx.clone();
        let ty = self.inner.ty.clone();
        DeferredQuery::new(None, self.inner.ctx.clone(), move || async move {
            let value = parent.resolve().await?;
            let items = value
                .as_array()
                .ok_or_else(|| Error::CannotMap { got: type_of(&value).into() })?;
            let results = hydrate::run_map(items, &cb, &ctx, ty.as_deref()).await?;
            Ok(Value::Array(results))
        })
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Stream the resolved items. A non-array value yields itself once.
    pub async fn stream(&self) -> Result<BoxStream<'static, Value>> {
        let items = match self.resolve().await? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Ok(stream::iter(items).boxed())
    }

    /// Bulk-process the resolved array. Requires this query to resolve to
    /// an array; the provider attached to the query serves as the actions
    /// API when persistence is requested.
    pub async fn for_each(&self, cb: ItemFn, options: ForEachOptions) -> Result<ForEachReport> {
        let items = match self.resolve().await? {
            Value::Array(items) => items,
            other => {
                return Err(Error::InvalidInput(format!(
                    "forEach requires an array, got {}",
                    type_of(&other)
                )));
            }
        };
        let action_type = format!("{}.forEach", self.inner.ty.as_deref().unwrap_or("Query"));
        bulk::for_each(items, cb, options, self.inner.ctx.provider.clone(), &action_type).await
    }
}

/// Walk a property path, short-circuiting to null. Property access on an
/// array does not implicitly map.
fn walk_path(base: &Value, path: &[String]) -> Value {
    let mut current = base;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_query(counter: Arc<AtomicUsize>, value: Value) -> DeferredQuery {
        DeferredQuery::new(None, QueryContext::detached(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    #[tokio::test]
    async fn test_idempotent_resolution() {
        let counter = Arc::new(AtomicUsize::new(0));
        let q = counted_query(Arc::clone(&counter), json!({ "a": 1 }));

        assert_eq!(q.resolve().await.unwrap(), json!({ "a": 1 }));
        assert_eq!(q.resolve().await.unwrap(), json!({ "a": 1 }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_resolves_once_for_many_children() {
        let counter = Arc::new(AtomicUsize::new(0));
        let q = counted_query(Arc::clone(&counter), json!({ "a": { "b": 2 }, "c": 3 }));

        assert_eq!(q.select("a.b").resolve().await.unwrap(), json!(2));
        assert_eq!(q.get("c").resolve().await.unwrap(), json!(3));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_path_walk_null_short_circuit() {
        let q = DeferredQuery::of_value(None, QueryContext::detached(), json!({ "a": null }));
        assert_eq!(q.select("a.b.c").resolve().await.unwrap(), Value::Null);
        assert_eq!(q.select("missing.x").resolve().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_array_access_does_not_map() {
        let q = DeferredQuery::of_value(
            None,
            QueryContext::detached(),
            json!([{ "name": "a" }, { "name": "b" }]),
        );
        // Property access on an array is null, not an implicit map.
        assert_eq!(q.get("name").resolve().await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_first_semantics() {
        let ctx = QueryContext::detached();
        let array = DeferredQuery::of_value(None, ctx.clone(), json!([1, 2, 3]));
        assert_eq!(array.first().resolve().await.unwrap(), json!(1));

        let empty = DeferredQuery::of_value(None, ctx.clone(), json!([]));
        assert_eq!(empty.first().resolve().await.unwrap(), Value::Null);

        let scalar = DeferredQuery::of_value(None, ctx, json!(42));
        assert_eq!(scalar.first().resolve().await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_filter_sort_limit() {
        let q = DeferredQuery::of_value(
            None,
            QueryContext::detached(),
            json!([{ "n": 3 }, { "n": 1 }, { "n": 2 }]),
        );
        let result = q
            .filter(|v| v["n"].as_i64().unwrap_or(0) > 1)
            .sort(|a, b| a["n"].as_i64().cmp(&b["n"].as_i64()))
            .limit(1)
            .resolve()
            .await
            .unwrap();
        assert_eq!(result, json!([{ "n": 2 }]));
    }

    #[tokio::test]
    async fn test_map_over_non_array_is_typed_error() {
        let q = DeferredQuery::of_value(None, QueryContext::detached(), json!({ "a": 1 }));
        let err = q.map(|_, _| Ok(Value::Null)).resolve().await.unwrap_err();
        assert!(matches!(err, Error::CannotMap { .. }));
    }

    #[tokio::test]
    async fn test_map_without_relations_needs_no_provider() {
        let q = DeferredQuery::of_value(
            None,
            QueryContext::detached(),
            json!([{ "n": 1 }, { "n": 2 }]),
        );
        let doubled = q
            .map(|item, _| Ok(json!(item.get("n").as_i64().unwrap_or(0) * 2)))
            .resolve()
            .await
            .unwrap();
        assert_eq!(doubled, json!([2, 4]));
    }

    #[tokio::test]
    async fn test_property_tracking() {
        let q = DeferredQuery::of_value(None, QueryContext::detached(), json!({ "a": 1, "b": 2 }));
        let _ = q.get("a");
        let _ = q.get("b");
        let _ = q.get("a");
        assert_eq!(q.accessed_fields(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_error_is_memoised() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c2 = Arc::clone(&counter);
        let q = DeferredQuery::new(None, QueryContext::detached(), move || async move {
            c2.fetch_add(1, Ordering::SeqCst);
            Err(Error::ExecutionError("boom".into()))
        });
        assert!(q.resolve().await.is_err());
        assert!(q.resolve().await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
