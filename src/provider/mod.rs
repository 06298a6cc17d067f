//! # Provider contract
//!
//! This is THE seam between the façade/query/scheduler layers and any
//! storage implementation. The trait is intentionally broad — a backend
//! that cannot support an optional operation returns a typed
//! `NotSupported` error rather than the contract splitting into a dozen
//! small traits.
//!
//! | Provider | Module | Description |
//! |----------|--------|-------------|
//! | `MemoryProvider` | `memory` | In-process reference implementation |

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{
    Action, ActionInput, ActionStatus, ActionUpdate, Artifact, ArtifactInput, Data, Event,
    EventInput,
};
use crate::search::{HybridOptions, SearchOptions};
use crate::{Error, Result};

pub use memory::MemoryProvider;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for opening a provider.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// In-memory (no persistence).
    Memory,
}

/// Open a provider from configuration.
pub fn open(config: ProviderConfig) -> Arc<dyn Provider> {
    match config {
        ProviderConfig::Memory => Arc::new(MemoryProvider::new()),
    }
}

// ============================================================================
// Options
// ============================================================================

/// Sort direction for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Options for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Equality filter over flat entity fields.
    pub where_: Option<Data>,
    pub order_by: Option<String>,
    pub order: Order,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListOptions {
    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.where_.get_or_insert_with(Data::new).insert(field.into(), value);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some(field.into());
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Filter for `list_actions`.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub ids: Option<Vec<String>>,
    pub statuses: Option<Vec<ActionStatus>>,
    pub action: Option<String>,
    pub actor: Option<String>,
    pub object: Option<String>,
    pub limit: Option<usize>,
}

impl ActionFilter {
    pub fn statuses(statuses: impl IntoIterator<Item = ActionStatus>) -> Self {
        Self { statuses: Some(statuses.into_iter().collect()), ..Self::default() }
    }

    pub fn ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self { ids: Some(ids.into_iter().collect()), ..Self::default() }
    }

    pub fn matches(&self, action: &Action) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &action.id) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&action.status) {
                return false;
            }
        }
        if let Some(verb) = &self.action {
            if &action.action != verb {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &action.actor != actor {
                return false;
            }
        }
        if let Some(object) = &self.object {
            if action.object.as_deref() != Some(object.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Filter for `list_events` / `replay_events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub pattern: Option<String>,
    pub actor: Option<String>,
    pub object: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self { pattern: Some(pattern.into()), ..Self::default() }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(pattern) = &self.pattern {
            if !crate::model::EventPattern::parse(pattern).matches(&event.event) {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &event.actor != actor {
                return false;
            }
        }
        if let Some(object) = &self.object {
            if event.object.as_deref() != Some(object.as_str()) {
                return false;
            }
        }
        if let Some(since) = &self.since {
            if event.timestamp < *since {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// What a provider can do — consulted by the façade and the scheduler
/// instead of downcasting.
#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilities {
    pub supports_semantic_search: bool,
    pub supports_hybrid_search: bool,
    pub supports_actions: bool,
    pub supports_events: bool,
    pub supports_artifacts: bool,
}

// ============================================================================
// Event subscription
// ============================================================================

/// Subscriber callback. Handlers run with no provider lock held and may
/// call back into the provider.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// ============================================================================
// Provider trait
// ============================================================================

/// The universal storage contract (flat entities in, flat entities out).
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    // ========================================================================
    // Entity CRUD
    // ========================================================================

    /// Get an entity by `(type, id)`. Returns `None` if absent.
    async fn get(&self, ty: &str, id: &str) -> Result<Option<Value>>;

    /// List entities of a type, filtered / sorted / paginated.
    async fn list(&self, ty: &str, options: ListOptions) -> Result<Vec<Value>>;

    /// Number of entities of a type.
    async fn count(&self, ty: &str) -> Result<usize> {
        Ok(self.list(ty, ListOptions::default()).await?.len())
    }

    /// Create an entity. A missing id is generated. Refuses duplicates.
    async fn create(&self, ty: &str, id: Option<&str>, data: Value) -> Result<Value>;

    /// Shallow-merge into an existing entity.
    async fn update(&self, ty: &str, id: &str, data: Value) -> Result<Value>;

    /// Create-or-merge.
    async fn upsert(&self, ty: &str, id: &str, data: Value) -> Result<Value> {
        if self.get(ty, id).await?.is_some() {
            self.update(ty, id, data).await
        } else {
            self.create(ty, Some(id), data).await
        }
    }

    /// Delete an entity and everything hanging off it. Returns whether it existed.
    async fn delete(&self, ty: &str, id: &str) -> Result<bool>;

    // ========================================================================
    // Relations
    // ========================================================================

    /// Hydrated relation targets in insertion order.
    async fn related(&self, ty: &str, id: &str, relation: &str) -> Result<Vec<Value>>;

    /// Add a relation edge. Idempotent.
    async fn relate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
        meta: Option<Value>,
    ) -> Result<()>;

    /// Remove a relation edge if present.
    async fn unrelate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
    ) -> Result<()>;

    // ========================================================================
    // Search
    // ========================================================================

    /// Lexical substring search.
    async fn search(&self, ty: &str, query: &str, options: SearchOptions) -> Result<Vec<Value>>;

    /// Embedding-based search. Optional.
    async fn semantic_search(
        &self,
        _ty: &str,
        _query: &str,
        _options: SearchOptions,
    ) -> Result<Vec<Value>> {
        Err(Error::NotSupported("semantic search".into()))
    }

    /// RRF fusion of lexical and semantic rankings. Optional.
    async fn hybrid_search(
        &self,
        _ty: &str,
        _query: &str,
        _options: HybridOptions,
    ) -> Result<Vec<Value>> {
        Err(Error::NotSupported("hybrid search".into()))
    }

    // ========================================================================
    // Actions (optional; required for durable features)
    // ========================================================================

    async fn create_action(&self, _input: ActionInput) -> Result<Action> {
        Err(Error::NotSupported("actions".into()))
    }

    async fn get_action(&self, _id: &str) -> Result<Option<Action>> {
        Err(Error::NotSupported("actions".into()))
    }

    async fn update_action(&self, _id: &str, _updates: ActionUpdate) -> Result<Action> {
        Err(Error::NotSupported("actions".into()))
    }

    async fn list_actions(&self, _filter: ActionFilter) -> Result<Vec<Action>> {
        Err(Error::NotSupported("actions".into()))
    }

    /// `failed → pending`, clearing error and completion stamp.
    async fn retry_action(&self, _id: &str) -> Result<Action> {
        Err(Error::NotSupported("actions".into()))
    }

    /// Forbidden on terminal actions.
    async fn cancel_action(&self, _id: &str) -> Result<Action> {
        Err(Error::NotSupported("actions".into()))
    }

    // ========================================================================
    // Events (optional)
    // ========================================================================

    /// Record an event, then notify matching subscribers (no lock held).
    async fn emit(&self, _input: EventInput) -> Result<Event> {
        Err(Error::NotSupported("events".into()))
    }

    /// Subscribe to an event-name pattern (`*`, `Type.*`, `*.action`, exact).
    fn on(&self, _pattern: &str, _handler: EventHandler) -> Result<SubscriptionId> {
        Err(Error::NotSupported("events".into()))
    }

    fn unsubscribe(&self, _id: SubscriptionId) -> Result<()> {
        Err(Error::NotSupported("events".into()))
    }

    async fn list_events(&self, _filter: EventFilter) -> Result<Vec<Event>> {
        Err(Error::NotSupported("events".into()))
    }

    /// Re-dispatch recorded events to current subscribers. Returns how
    /// many were replayed.
    async fn replay_events(&self, _filter: EventFilter) -> Result<usize> {
        Err(Error::NotSupported("events".into()))
    }

    // ========================================================================
    // Artifacts (optional)
    // ========================================================================

    async fn get_artifact(&self, _url: &str, _ty: &str) -> Result<Option<Artifact>> {
        Err(Error::NotSupported("artifacts".into()))
    }

    async fn set_artifact(&self, _url: &str, _ty: &str, _input: ArtifactInput) -> Result<Artifact> {
        Err(Error::NotSupported("artifacts".into()))
    }

    /// Delete artifacts under a URL; a type narrows to one. Returns count.
    async fn delete_artifact(&self, _url: &str, _ty: Option<&str>) -> Result<usize> {
        Err(Error::NotSupported("artifacts".into()))
    }

    async fn list_artifacts(&self, _url_prefix: &str) -> Result<Vec<Artifact>> {
        Err(Error::NotSupported("artifacts".into()))
    }

    // ========================================================================
    // Capability negotiation
    // ========================================================================

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }
}
