//! # thingdb-rs — Schema-First, Graph-Aware Entity Store
//!
//! A database façade for AI-driven application workloads: declarative
//! entity schemas with automatic bi-directional relations, deferred
//! queries with batched relation hydration, and durable
//! priority-scheduled asynchronous work.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Provider` is the contract between the façade and storage
//! 2. **Clean DTOs**: `Thing`, `Event`, `Action`, `Artifact` cross all boundaries
//! 3. **Parser owns nothing**: schema → `ParsedSchema` is a pure function
//! 4. **Explicit wiring**: a `Db` value carries the schema, provider, and
//!    queue — no process-wide singletons
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use thingdb_rs::Db;
//!
//! # async fn example() -> thingdb_rs::Result<()> {
//! let db = Db::open_memory(&json!({
//!     "Post":   { "title": "string", "author": "Author.posts" },
//!     "Author": { "name": "string" },
//! }))?;
//!
//! db.create("Author", Some("ada"), json!({ "name": "Ada" })).await?;
//! db.create("Post", Some("p1"), json!({ "title": "Hello", "author": "ada" })).await?;
//!
//! // Deferred: nothing runs until the first await; the author relation
//! // is batch-hydrated because the callback reads through it.
//! let titles = db
//!     .query("Post")
//!     .map(|post, _| Ok(json!({
//!         "title": post.get("title").into_value(),
//!         "by": post.get("author").get("name").into_value(),
//!     })))
//!     .resolve()
//!     .await?;
//! # let _ = titles;
//! # Ok(())
//! # }
//! ```
//!
//! ## Subsystems
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `schema` | Parse schemas, resolve inverse relations, emit noun/edge metadata |
//! | `query` | Deferred, access-tracking queries with batch relation hydration |
//! | `bulk` | Resumable concurrency-limited forEach with persisted progress |
//! | `durable` | Durable promises, priority queue, batch scheduler, recovery |
//! | `provider` | The storage contract and the in-memory reference provider |
//! | `search` | Deterministic embeddings, lexical scoring, RRF fusion |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod schema;
pub mod provider;
pub mod search;
pub mod query;
pub mod bulk;
pub mod durable;
pub mod url;
pub mod validate;

use std::sync::Arc;

use serde_json::Value;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Action, ActionInput, ActionStatus, ActionUpdate, Artifact, ArtifactInput, Data, Event,
    EventInput, EventPattern, Thing, ThingKey,
};

// ============================================================================
// Re-exports: Schema
// ============================================================================

pub use schema::{
    conjugate, edge_records, noun_record, Cardinality, Edge, Noun, NounOverride, ParsedEntity,
    ParsedField, ParsedSchema, RelationInfo, VerbForms,
};

// ============================================================================
// Re-exports: Provider
// ============================================================================

pub use provider::{
    ActionFilter, EventFilter, EventHandler, ListOptions, MemoryProvider, Order, Provider,
    ProviderCapabilities, ProviderConfig, SubscriptionId,
};

// ============================================================================
// Re-exports: Query / Bulk / Durable
// ============================================================================

pub use bulk::{
    item_fn, ErrorDecision, ForEachOptions, ForEachReport, ItemFn, Persist, Progress,
};
pub use durable::{
    with_context, work_fn, BatchProvider, ContextFrame, DurablePromise, ExecutionContext,
    ExecutionQueue, PromiseState, QueueConfig, RecoveryReport, SubmitOptions, Tier,
};
pub use query::{DeferredQuery, FieldView, ItemView, QueryContext};
pub use search::{HybridOptions, SearchOptions};

// ============================================================================
// Top-level Db handle
// ============================================================================

/// The primary entry point. A `Db` binds a parsed schema, a provider,
/// and an execution queue, and exposes typed entity operations, deferred
/// queries, bulk processing, and durable submission.
pub struct Db {
    inner: Arc<DbInner>,
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct DbInner {
    schema: ParsedSchema,
    relations: Arc<RelationInfo>,
    nouns: Vec<Noun>,
    provider: Arc<dyn Provider>,
    queue: ExecutionQueue,
    ctx: Arc<ExecutionContext>,
}

impl Db {
    /// Open against the in-memory reference provider.
    pub fn open_memory(schema: &Value) -> Result<Self> {
        Self::with_provider(schema, Arc::new(MemoryProvider::new()))
    }

    /// Open against any provider.
    pub fn with_provider(schema: &Value, provider: Arc<dyn Provider>) -> Result<Self> {
        Self::with_queue(schema, provider, ExecutionQueue::default())
    }

    pub fn with_queue(
        schema: &Value,
        provider: Arc<dyn Provider>,
        queue: ExecutionQueue,
    ) -> Result<Self> {
        let schema = schema::parse(schema)?;
        let relations = Arc::new(schema.relation_info());
        let nouns = schema
            .entities
            .iter()
            .map(|entity| noun_record(&entity.name, None))
            .collect();
        let ctx = ExecutionContext::with_frame(
            ContextFrame::default().provider(Arc::clone(&provider)),
        );
        Ok(Self {
            inner: Arc::new(DbInner { schema, relations, nouns, provider, queue, ctx }),
        })
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn schema(&self) -> &ParsedSchema {
        &self.inner.schema
    }

    pub fn relations(&self) -> &Arc<RelationInfo> {
        &self.inner.relations
    }

    /// Noun metadata for every entity type, in schema order.
    pub fn nouns(&self) -> &[Noun] {
        &self.inner.nouns
    }

    pub fn noun(&self, ty: &str) -> Option<&Noun> {
        self.inner.nouns.iter().find(|n| n.name == ty)
    }

    /// Edge metadata for one type's relations.
    pub fn edges(&self, ty: &str) -> Vec<Edge> {
        edge_records(ty, &self.inner.schema)
    }

    /// Conjugated verb forms for a base verb.
    pub fn verb(&self, base: &str) -> VerbForms {
        conjugate(base)
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.inner.provider)
    }

    pub fn queue(&self) -> ExecutionQueue {
        self.inner.queue.clone()
    }

    /// Root execution context (provider attached, standard tier).
    pub fn context(&self) -> Arc<ExecutionContext> {
        Arc::clone(&self.inner.ctx)
    }

    fn check_type(&self, ty: &str) -> Result<()> {
        validate::type_name(ty)?;
        if self.inner.schema.entity(ty).is_none() {
            return Err(Error::InvalidInput(format!("unknown type '{ty}'")));
        }
        Ok(())
    }

    // ========================================================================
    // Entity operations
    // ========================================================================

    pub async fn get(&self, ty: &str, id: &str) -> Result<Option<Value>> {
        self.check_type(ty)?;
        validate::id(id)?;
        self.inner.provider.get(ty, id).await
    }

    pub async fn list(&self, ty: &str, options: ListOptions) -> Result<Vec<Value>> {
        self.check_type(ty)?;
        self.inner.provider.list(ty, options).await
    }

    pub async fn count(&self, ty: &str) -> Result<usize> {
        self.check_type(ty)?;
        self.inner.provider.count(ty).await
    }

    pub async fn create(&self, ty: &str, id: Option<&str>, data: Value) -> Result<Value> {
        self.check_type(ty)?;
        if let Some(id) = id {
            validate::id(id)?;
        }
        self.inner.provider.create(ty, id, data).await
    }

    pub async fn update(&self, ty: &str, id: &str, data: Value) -> Result<Value> {
        self.check_type(ty)?;
        validate::id(id)?;
        self.inner.provider.update(ty, id, data).await
    }

    pub async fn upsert(&self, ty: &str, id: &str, data: Value) -> Result<Value> {
        self.check_type(ty)?;
        validate::id(id)?;
        self.inner.provider.upsert(ty, id, data).await
    }

    pub async fn delete(&self, ty: &str, id: &str) -> Result<bool> {
        self.check_type(ty)?;
        validate::id(id)?;
        self.inner.provider.delete(ty, id).await
    }

    // ========================================================================
    // Relations
    // ========================================================================

    pub async fn related(&self, ty: &str, id: &str, relation: &str) -> Result<Vec<Value>> {
        self.check_type(ty)?;
        validate::id(id)?;
        validate::field_name(relation)?;
        self.inner.provider.related(ty, id, relation).await
    }

    pub async fn relate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
        meta: Option<Value>,
    ) -> Result<()> {
        self.check_type(from_ty)?;
        self.check_type(to_ty)?;
        validate::id(from_id)?;
        validate::id(to_id)?;
        validate::field_name(relation)?;
        self.inner.provider.relate(from_ty, from_id, relation, to_ty, to_id, meta).await
    }

    pub async fn unrelate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
    ) -> Result<()> {
        self.check_type(from_ty)?;
        self.check_type(to_ty)?;
        validate::id(from_id)?;
        validate::id(to_id)?;
        validate::field_name(relation)?;
        self.inner.provider.unrelate(from_ty, from_id, relation, to_ty, to_id).await
    }

    // ========================================================================
    // Search
    // ========================================================================

    pub async fn search(&self, ty: &str, query: &str, options: SearchOptions) -> Result<Vec<Value>> {
        self.check_type(ty)?;
        validate::search_query(query)?;
        self.inner.provider.search(ty, query, options).await
    }

    pub async fn semantic_search(
        &self,
        ty: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Value>> {
        self.check_type(ty)?;
        validate::search_query(query)?;
        self.inner.provider.semantic_search(ty, query, options).await
    }

    pub async fn hybrid_search(
        &self,
        ty: &str,
        query: &str,
        options: HybridOptions,
    ) -> Result<Vec<Value>> {
        self.check_type(ty)?;
        validate::search_query(query)?;
        self.inner.provider.hybrid_search(ty, query, options).await
    }

    // ========================================================================
    // Deferred queries
    // ========================================================================

    fn query_context(&self) -> QueryContext {
        QueryContext::new(Arc::clone(&self.inner.provider), Arc::clone(&self.inner.relations))
    }

    /// Deferred list of a type. Nothing runs until first awaited.
    pub fn query(&self, ty: &str) -> DeferredQuery {
        let provider = Arc::clone(&self.inner.provider);
        let owned_ty = ty.to_owned();
        DeferredQuery::new(Some(ty.to_owned()), self.query_context(), move || async move {
            let items = provider.list(&owned_ty, ListOptions::default()).await?;
            Ok(Value::Array(items))
        })
    }

    /// Deferred filtered list.
    pub fn query_where(&self, ty: &str, where_: Data) -> DeferredQuery {
        let provider = Arc::clone(&self.inner.provider);
        let owned_ty = ty.to_owned();
        DeferredQuery::new(Some(ty.to_owned()), self.query_context(), move || async move {
            let options = ListOptions { where_: Some(where_), ..ListOptions::default() };
            let items = provider.list(&owned_ty, options).await?;
            Ok(Value::Array(items))
        })
    }

    /// Deferred single entity (null when absent).
    pub fn query_one(&self, ty: &str, id: &str) -> DeferredQuery {
        let provider = Arc::clone(&self.inner.provider);
        let owned_ty = ty.to_owned();
        let owned_id = id.to_owned();
        DeferredQuery::new(Some(ty.to_owned()), self.query_context(), move || async move {
            Ok(provider.get(&owned_ty, &owned_id).await?.unwrap_or(Value::Null))
        })
    }

    // ========================================================================
    // Bulk processing
    // ========================================================================

    /// Bulk-process entities of a type, optionally pre-filtered. Persisted
    /// runs default to the `{Type}.forEach` action type.
    pub async fn for_each(
        &self,
        ty: &str,
        where_: Option<Data>,
        cb: ItemFn,
        options: ForEachOptions,
    ) -> Result<ForEachReport> {
        self.check_type(ty)?;
        let items = self
            .inner
            .provider
            .list(ty, ListOptions { where_, ..ListOptions::default() })
            .await?;
        bulk::for_each(
            items,
            cb,
            options,
            Some(Arc::clone(&self.inner.provider)),
            &format!("{ty}.forEach"),
        )
        .await
    }

    // ========================================================================
    // Durable work
    // ========================================================================

    /// Submit durable work under this db's root context.
    pub async fn submit(
        &self,
        method: &str,
        options: SubmitOptions,
        work: durable::WorkFn,
    ) -> Result<DurablePromise> {
        self.inner.queue.submit(&self.inner.ctx, method, options, work).await
    }

    /// Crash recovery: fail interrupted Actions, count pending ones.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.inner.queue.recover(&self.inner.provider).await
    }

    /// Move matching failed Actions back to pending.
    pub async fn retry_failed(&self, filter: Option<ActionFilter>) -> Result<usize> {
        self.inner.queue.retry_failed(&self.inner.provider, filter).await
    }

    // ========================================================================
    // Events / Actions / Artifacts pass-throughs
    // ========================================================================

    pub async fn emit(&self, input: EventInput) -> Result<Event> {
        self.inner.provider.emit(input).await
    }

    pub fn on(&self, pattern: &str, handler: EventHandler) -> Result<SubscriptionId> {
        self.inner.provider.on(pattern, handler)
    }

    pub async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        self.inner.provider.list_events(filter).await
    }

    pub async fn replay_events(&self, filter: EventFilter) -> Result<usize> {
        self.inner.provider.replay_events(filter).await
    }

    pub async fn create_action(&self, input: ActionInput) -> Result<Action> {
        if let Some(action_type) = &input.action_type {
            validate::action_type(action_type)?;
        }
        self.inner.provider.create_action(input).await
    }

    pub async fn get_action(&self, id: &str) -> Result<Option<Action>> {
        self.inner.provider.get_action(id).await
    }

    pub async fn list_actions(&self, filter: ActionFilter) -> Result<Vec<Action>> {
        self.inner.provider.list_actions(filter).await
    }

    pub async fn get_artifact(&self, url: &str, ty: &str) -> Result<Option<Artifact>> {
        self.inner.provider.get_artifact(url, ty).await
    }

    pub async fn list_artifacts(&self, url_prefix: &str) -> Result<Vec<Artifact>> {
        self.inner.provider.list_artifacts(url_prefix).await
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Schema error in {entity}.{field}: {message}")]
    SchemaError { entity: String, field: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: String, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Illegal transition for {entity}: {from} -> {to}")]
    IllegalTransition { entity: String, from: String, to: String },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("cannot map over non-array: got {got}")]
    CannotMap { got: String },

    #[error("Timed out after {ms} ms: {context}")]
    Timeout { ms: u64, context: String },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{0} not supported by this provider")]
    NotSupported(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Backend error: {0}")]
    BackendError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
