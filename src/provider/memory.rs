//! In-memory provider.
//!
//! This is the reference implementation of `Provider`. Simple maps behind
//! `parking_lot::RwLock`, no persistence.
//!
//! ## Limitations
//!
//! - **No durability**: everything dies with the process. Actions are
//!   "durable" only relative to the handle that watches them.
//! - **Per-collection locks**: multi-step mutations are not atomic across
//!   collections. Safe for the cooperative model; a multi-threaded caller
//!   gets per-collection consistency only.
//! - **Full scans**: `list`, `search`, and friends scan the type's map.
//!
//! Subscriber handlers run on the emitting task after every lock is
//! released, so they may call back into the provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use crate::model::{
    Action, ActionInput, ActionStatus, ActionUpdate, Artifact, ArtifactInput, Data, Event,
    EventInput, EventPattern, EMBEDDING_ARTIFACT,
};
use crate::schema::conjugate;
use crate::search::{
    self, content_hash, embed, embeddable_fields, lexical_score, searchable_text,
    similarity_score, HybridOptions, SearchOptions, FTS_RANK_KEY, RRF_SCORE_KEY, SCORE_KEY,
    SEMANTIC_RANK_KEY,
};
use crate::{Error, Result};

use super::{
    ActionFilter, EventFilter, EventHandler, ListOptions, Order, Provider, ProviderCapabilities,
    SubscriptionId,
};

// ============================================================================
// MemoryProvider
// ============================================================================

/// In-process reference provider.
pub struct MemoryProvider {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    /// type → (id → flat entity)
    entities: RwLock<HashMap<String, HashMap<String, Value>>>,
    /// `fromType:fromId:relation` → targets `toType:toId`, insertion order
    relations: RwLock<HashMap<String, Vec<String>>>,
    events: RwLock<Vec<Event>>,
    subscribers: RwLock<Vec<Subscriber>>,
    actions: RwLock<HashMap<String, Action>>,
    artifacts: RwLock<HashMap<(String, String), Artifact>>,
    /// Per-type embedding field selection; absent means auto-detect.
    embedding_fields: RwLock<HashMap<String, Vec<String>>>,
    next_id: AtomicU64,
}

struct Subscriber {
    id: SubscriptionId,
    pattern: EventPattern,
    handler: EventHandler,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                entities: RwLock::new(HashMap::new()),
                relations: RwLock::new(HashMap::new()),
                events: RwLock::new(Vec::new()),
                subscribers: RwLock::new(Vec::new()),
                actions: RwLock::new(HashMap::new()),
                artifacts: RwLock::new(HashMap::new()),
                embedding_fields: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Pin the fields embedded for a type. Without this, string fields
    /// are auto-detected per entity.
    pub fn set_embedding_fields(&self, ty: impl Into<String>, fields: Vec<String>) {
        self.inner.embedding_fields.write().insert(ty.into(), fields);
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    fn relation_key(from_ty: &str, from_id: &str, relation: &str) -> String {
        format!("{from_ty}:{from_id}:{relation}")
    }

    fn target_key(to_ty: &str, to_id: &str) -> String {
        format!("{to_ty}:{to_id}")
    }

    fn exists(&self, ty: &str, id: &str) -> bool {
        self.inner.entities.read().get(ty).is_some_and(|m| m.contains_key(id))
    }

    // ========================================================================
    // Event plumbing
    // ========================================================================

    /// Append the event, then notify matching subscribers with no lock held.
    fn record_and_notify(&self, input: EventInput) -> Event {
        let event = Event {
            id: self.next_id("event"),
            actor: input.actor.unwrap_or_else(|| "system".to_owned()),
            actor_data: input.actor_data,
            event: input.event,
            object: input.object,
            object_data: input.object_data,
            result: input.result,
            result_data: input.result_data,
            meta: input.meta,
            timestamp: Utc::now(),
        };
        self.inner.events.write().push(event.clone());
        self.notify(&event);
        event
    }

    fn notify(&self, event: &Event) {
        let handlers: Vec<EventHandler> = {
            let subscribers = self.inner.subscribers.read();
            subscribers
                .iter()
                .filter(|s| s.pattern.matches(&event.event))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    fn emit_entity_event(&self, name: String, ty: &str, id: &str, entity: &Value) {
        self.record_and_notify(
            EventInput::named(name)
                .object(format!("{ty}/{id}"))
                .object_data(entity.clone()),
        );
    }

    // ========================================================================
    // Embeddings & artifacts
    // ========================================================================

    /// Regenerate the embedding artifact for an entity.
    fn auto_embed(&self, ty: &str, id: &str, entity: &Value) {
        let configured = self.inner.embedding_fields.read().get(ty).cloned();
        let fields = configured.unwrap_or_else(|| embeddable_fields(entity));
        let text = searchable_text(entity, Some(&fields));
        if text.is_empty() {
            return;
        }
        let vector = embed(&text);
        let url = format!("{ty}/{id}");
        let artifact = Artifact {
            url: url.clone(),
            ty: EMBEDDING_ARTIFACT.to_owned(),
            source_hash: content_hash(&text),
            content: serde_json::to_string(&vector).unwrap_or_default(),
            metadata: Some(json!({
                "fields": fields,
                "dimensions": search::DIMENSIONS,
                "text": text.chars().take(200).collect::<String>(),
            })),
            created_at: Utc::now(),
        };
        self.inner.artifacts.write().insert((url, EMBEDDING_ARTIFACT.to_owned()), artifact);
    }

    fn stored_embedding(&self, ty: &str, id: &str) -> Option<Vec<f32>> {
        let artifacts = self.inner.artifacts.read();
        let artifact = artifacts.get(&(format!("{ty}/{id}"), EMBEDDING_ARTIFACT.to_owned()))?;
        serde_json::from_str(&artifact.content).ok()
    }

    /// Drop artifacts whose url starts with `prefix`. `keep_embeddings`
    /// spares the regenerated embedding artifacts.
    fn purge_artifacts(&self, prefix: &str, keep_embeddings: bool) -> usize {
        let mut artifacts = self.inner.artifacts.write();
        let before = artifacts.len();
        artifacts.retain(|(url, ty), _| {
            !(url.starts_with(prefix) && !(keep_embeddings && ty == EMBEDDING_ARTIFACT))
        });
        before - artifacts.len()
    }
}

// ============================================================================
// Provider impl
// ============================================================================

#[async_trait]
impl Provider for MemoryProvider {
    // ========================================================================
    // Entity CRUD
    // ========================================================================

    async fn get(&self, ty: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.inner.entities.read().get(ty).and_then(|m| m.get(id)).cloned())
    }

    async fn list(&self, ty: &str, options: ListOptions) -> Result<Vec<Value>> {
        let mut items: Vec<Value> = self
            .inner
            .entities
            .read()
            .get(ty)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();

        if let Some(where_) = &options.where_ {
            items.retain(|item| {
                where_.iter().all(|(k, v)| item.get(k) == Some(v))
            });
        }

        if let Some(order_by) = &options.order_by {
            items.sort_by(|a, b| {
                let ord = json_field_cmp(a.get(order_by), b.get(order_by));
                match options.order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }

        let offset = options.offset.unwrap_or(0);
        if offset > 0 {
            items = items.into_iter().skip(offset).collect();
        }
        if let Some(limit) = options.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn count(&self, ty: &str) -> Result<usize> {
        Ok(self.inner.entities.read().get(ty).map_or(0, |m| m.len()))
    }

    async fn create(&self, ty: &str, id: Option<&str>, data: Value) -> Result<Value> {
        let data = as_object(data)?;
        let id = match id {
            Some(id) => id.to_owned(),
            None => match data.get("$id").and_then(Value::as_str) {
                Some(id) => id.to_owned(),
                None => self.next_id(&ty.to_lowercase()),
            },
        };

        let now = Utc::now().to_rfc3339();
        let mut entity = Data::new();
        entity.insert("$id".into(), Value::String(id.clone()));
        entity.insert("$type".into(), Value::String(ty.to_owned()));
        for (k, v) in data {
            if k == "$id" || k == "$type" {
                continue;
            }
            entity.insert(k, v);
        }
        entity.insert("createdAt".into(), Value::String(now.clone()));
        entity.insert("updatedAt".into(), Value::String(now));
        let entity = Value::Object(entity);

        {
            let mut entities = self.inner.entities.write();
            let of_type = entities.entry(ty.to_owned()).or_default();
            if of_type.contains_key(&id) {
                return Err(Error::AlreadyExists { kind: ty.to_owned(), key: id });
            }
            of_type.insert(id.clone(), entity.clone());
        }

        self.auto_embed(ty, &id, &entity);
        self.emit_entity_event(format!("{ty}.created"), ty, &id, &entity);
        Ok(entity)
    }

    async fn update(&self, ty: &str, id: &str, data: Value) -> Result<Value> {
        let data = as_object(data)?;
        let entity = {
            let mut entities = self.inner.entities.write();
            let existing = entities
                .get_mut(ty)
                .and_then(|m| m.get_mut(id))
                .ok_or_else(|| Error::NotFound(format!("{ty}/{id}")))?;
            let obj = existing
                .as_object_mut()
                .ok_or_else(|| Error::BackendError(format!("corrupt entity {ty}/{id}")))?;
            for (k, v) in data {
                if k == "$id" || k == "$type" {
                    continue;
                }
                obj.insert(k, v);
            }
            obj.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
            existing.clone()
        };

        self.auto_embed(ty, id, &entity);
        // Derived artifacts other than the fresh embedding are now stale.
        self.purge_artifacts(&format!("{ty}/{id}"), true);
        self.emit_entity_event(format!("{ty}.updated"), ty, id, &entity);
        Ok(entity)
    }

    async fn delete(&self, ty: &str, id: &str) -> Result<bool> {
        let removed = {
            let mut entities = self.inner.entities.write();
            entities.get_mut(ty).and_then(|m| m.remove(id))
        };
        let Some(entity) = removed else {
            return Ok(false);
        };

        // Every edge touching the entity goes, both directions.
        {
            let mut relations = self.inner.relations.write();
            let from_prefix = format!("{ty}:{id}:");
            let target = Self::target_key(ty, id);
            relations.retain(|key, _| !key.starts_with(&from_prefix));
            for targets in relations.values_mut() {
                targets.retain(|t| t != &target);
            }
        }

        self.purge_artifacts(&format!("{ty}/{id}"), false);
        self.emit_entity_event(format!("{ty}.deleted"), ty, id, &entity);
        Ok(true)
    }

    // ========================================================================
    // Relations
    // ========================================================================

    async fn related(&self, ty: &str, id: &str, relation: &str) -> Result<Vec<Value>> {
        let targets = self
            .inner
            .relations
            .read()
            .get(&Self::relation_key(ty, id, relation))
            .cloned()
            .unwrap_or_default();

        let entities = self.inner.entities.read();
        Ok(targets
            .iter()
            .filter_map(|t| {
                let (to_ty, to_id) = t.split_once(':')?;
                entities.get(to_ty).and_then(|m| m.get(to_id)).cloned()
            })
            .collect())
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
        if !self.exists(from_ty, from_id) {
            return Err(Error::NotFound(format!("{from_ty}/{from_id}")));
        }
        if !self.exists(to_ty, to_id) {
            return Err(Error::NotFound(format!("{to_ty}/{to_id}")));
        }

        {
            let mut relations = self.inner.relations.write();
            let targets = relations
                .entry(Self::relation_key(from_ty, from_id, relation))
                .or_default();
            let target = Self::target_key(to_ty, to_id);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        let mut input = EventInput::named("Relation.created")
            .object(format!("{from_ty}/{from_id}"))
            .object_data(json!({
                "from": format!("{from_ty}/{from_id}"),
                "relation": relation,
                "to": format!("{to_ty}/{to_id}"),
            }));
        if let Some(meta) = meta {
            input = input.meta(meta);
        }
        self.record_and_notify(input);
        Ok(())
    }

    async fn unrelate(
        &self,
        from_ty: &str,
        from_id: &str,
        relation: &str,
        to_ty: &str,
        to_id: &str,
    ) -> Result<()> {
        let removed = {
            let mut relations = self.inner.relations.write();
            let key = Self::relation_key(from_ty, from_id, relation);
            let target = Self::target_key(to_ty, to_id);
            match relations.get_mut(&key) {
                Some(targets) => {
                    let before = targets.len();
                    targets.retain(|t| t != &target);
                    targets.len() != before
                }
                None => false,
            }
        };

        if removed {
            self.record_and_notify(
                EventInput::named("Relation.deleted")
                    .object(format!("{from_ty}/{from_id}"))
                    .object_data(json!({
                        "from": format!("{from_ty}/{from_id}"),
                        "relation": relation,
                        "to": format!("{to_ty}/{to_id}"),
                    })),
            );
        }
        Ok(())
    }

    // ========================================================================
    // Search
    // ========================================================================

    async fn search(&self, ty: &str, query: &str, options: SearchOptions) -> Result<Vec<Value>> {
        let items = self.list(ty, ListOptions::default()).await?;
        let mut scored: Vec<(f64, Value)> = items
            .into_iter()
            .filter_map(|item| {
                let text = searchable_text(&item, options.fields.as_deref());
                let score = lexical_score(&text, query);
                (score > options.min_score).then_some((score, item))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            scored.truncate(limit);
        }
        Ok(scored.into_iter().map(|(score, item)| with_key(item, SCORE_KEY, json!(score))).collect())
    }

    async fn semantic_search(
        &self,
        ty: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Value>> {
        let query_vec = embed(query);
        let items = self.list(ty, ListOptions::default()).await?;
        let mut scored: Vec<(f64, Value)> = items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("$id").and_then(Value::as_str)?;
                let vector = self
                    .stored_embedding(ty, id)
                    .unwrap_or_else(|| embed(&searchable_text(&item, options.fields.as_deref())));
                let score = similarity_score(&query_vec, &vector);
                (score > options.min_score).then_some((score, item))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            scored.truncate(limit);
        }
        Ok(scored.into_iter().map(|(score, item)| with_key(item, SCORE_KEY, json!(score))).collect())
    }

    async fn hybrid_search(
        &self,
        ty: &str,
        query: &str,
        options: HybridOptions,
    ) -> Result<Vec<Value>> {
        let lexical = self
            .search(ty, query, SearchOptions { min_score: 0.0, ..SearchOptions::default() })
            .await?;
        let semantic = self
            .semantic_search(ty, query, SearchOptions::default())
            .await?;

        let fts_ranks: HashMap<String, usize> = ranks_by_id(&lexical);
        let semantic_ranks: HashMap<String, usize> = ranks_by_id(&semantic);
        let semantic_scores: HashMap<String, f64> = semantic
            .iter()
            .filter_map(|item| {
                Some((
                    item.get("$id")?.as_str()?.to_owned(),
                    item.get(SCORE_KEY)?.as_f64()?,
                ))
            })
            .collect();

        let items = self.list(ty, ListOptions::default()).await?;
        let mut fused: Vec<(f64, Value)> = items
            .into_iter()
            .filter_map(|item| {
                let id = item.get("$id").and_then(Value::as_str)?.to_owned();
                let fts_rank = fts_ranks.get(&id).copied();
                let semantic_rank = semantic_ranks.get(&id).copied();
                let rrf = search::rrf_score(
                    fts_rank,
                    semantic_rank,
                    options.k,
                    options.fts_weight,
                    options.semantic_weight,
                );
                if rrf <= options.min_score {
                    return None;
                }
                let mut item = with_key(item, RRF_SCORE_KEY, json!(rrf));
                if let Some(rank) = fts_rank {
                    item = with_key(item, FTS_RANK_KEY, json!(rank));
                }
                if let Some(rank) = semantic_rank {
                    item = with_key(item, SEMANTIC_RANK_KEY, json!(rank));
                }
                if let Some(score) = semantic_scores.get(&id) {
                    item = with_key(item, SCORE_KEY, json!(score));
                }
                Some((rrf, item))
            })
            .collect();
        fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            fused.truncate(limit);
        }
        Ok(fused.into_iter().map(|(_, item)| item).collect())
    }

    // ========================================================================
    // Actions
    // ========================================================================

    async fn create_action(&self, input: ActionInput) -> Result<Action> {
        let verb = match (&input.action, &input.action_type) {
            (Some(verb), _) => verb.clone(),
            (None, Some(ty)) => ty.rsplit('.').next().unwrap_or(ty).to_owned(),
            (None, None) => {
                return Err(Error::InvalidInput(
                    "create_action requires 'action' or 'action_type'".into(),
                ));
            }
        };
        let forms = conjugate(&verb);
        let now = Utc::now();
        let action = Action {
            id: self.next_id("action"),
            actor: input.actor.unwrap_or_else(|| "system".to_owned()),
            action: forms.action,
            act: forms.act,
            activity: forms.activity,
            object: input.object.or(input.action_type),
            object_data: input.object_data,
            status: ActionStatus::Pending,
            progress: None,
            total: input.total,
            result: None,
            error: None,
            meta: input.meta,
            data: input.data,
            priority: input.priority,
            batch: None,
            batch_index: None,
            batch_total: None,
            created_at: now,
            updated_at: now,
            scheduled_at: input.scheduled_at,
            started_at: None,
            completed_at: None,
        };
        self.inner.actions.write().insert(action.id.clone(), action.clone());
        self.record_and_notify(
            EventInput::named("Action.created")
                .actor(action.actor.clone())
                .object(action.id.clone()),
        );
        Ok(action)
    }

    async fn get_action(&self, id: &str) -> Result<Option<Action>> {
        Ok(self.inner.actions.read().get(id).cloned())
    }

    async fn update_action(&self, id: &str, updates: ActionUpdate) -> Result<Action> {
        let (action, status_changed) = {
            let mut actions = self.inner.actions.write();
            let action = actions
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("action {id}")))?;

            let mut status_changed = None;
            if let Some(status) = updates.status {
                if !action.status.can_transition(status) {
                    return Err(Error::IllegalTransition {
                        entity: format!("action {id}"),
                        from: action.status.as_str().to_owned(),
                        to: status.as_str().to_owned(),
                    });
                }
                if status != action.status {
                    status_changed = Some(status);
                }
                action.status = status;
                let now = Utc::now();
                if status == ActionStatus::Active && action.started_at.is_none() {
                    action.started_at = Some(now);
                }
                if status.is_terminal() {
                    action.completed_at = Some(now);
                }
            }
            if let Some(progress) = updates.progress {
                action.progress = Some(progress);
            }
            if let Some(total) = updates.total {
                action.total = Some(total);
            }
            if let Some(result) = updates.result {
                action.result = Some(result);
            }
            if let Some(error) = updates.error {
                action.error = Some(error);
            }
            if let Some(data) = updates.data {
                action.data = Some(data);
            }
            if let Some(meta) = updates.meta {
                action.meta = Some(meta);
            }
            if let Some(batch) = updates.batch {
                action.batch = Some(batch);
            }
            if let Some(batch_index) = updates.batch_index {
                action.batch_index = Some(batch_index);
            }
            if let Some(batch_total) = updates.batch_total {
                action.batch_total = Some(batch_total);
            }
            action.updated_at = Utc::now();
            (action.clone(), status_changed)
        };

        if let Some(suffix) = status_changed.and_then(ActionStatus::event_suffix) {
            let mut input = EventInput::named(format!("Action.{suffix}"))
                .actor(action.actor.clone())
                .object(action.id.clone());
            if let Some(error) = &action.error {
                input.result = Some("error".to_owned());
                input.result_data = Some(json!({ "error": error }));
            }
            self.record_and_notify(input);
        }
        Ok(action)
    }

    async fn list_actions(&self, filter: ActionFilter) -> Result<Vec<Action>> {
        let mut actions: Vec<Action> = self
            .inner
            .actions
            .read()
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            actions.truncate(limit);
        }
        Ok(actions)
    }

    async fn retry_action(&self, id: &str) -> Result<Action> {
        let action = {
            let mut actions = self.inner.actions.write();
            let action = actions
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("action {id}")))?;
            if action.status != ActionStatus::Failed {
                return Err(Error::IllegalTransition {
                    entity: format!("action {id}"),
                    from: action.status.as_str().to_owned(),
                    to: ActionStatus::Pending.as_str().to_owned(),
                });
            }
            action.status = ActionStatus::Pending;
            action.error = None;
            action.completed_at = None;
            action.updated_at = Utc::now();
            action.clone()
        };
        self.record_and_notify(
            EventInput::named("Action.retried")
                .actor(action.actor.clone())
                .object(action.id.clone()),
        );
        Ok(action)
    }

    async fn cancel_action(&self, id: &str) -> Result<Action> {
        {
            let actions = self.inner.actions.read();
            let action = actions
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("action {id}")))?;
            if action.status.is_terminal() {
                return Err(Error::IllegalTransition {
                    entity: format!("action {id}"),
                    from: action.status.as_str().to_owned(),
                    to: ActionStatus::Cancelled.as_str().to_owned(),
                });
            }
        }
        self.update_action(id, ActionUpdate::status(ActionStatus::Cancelled)).await
    }

    // ========================================================================
    // Events
    // ========================================================================

    async fn emit(&self, input: EventInput) -> Result<Event> {
        if input.event.is_empty() {
            return Err(Error::InvalidInput("event name must not be empty".into()));
        }
        Ok(self.record_and_notify(input))
    }

    fn on(&self, pattern: &str, handler: EventHandler) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscriber {
            id,
            pattern: EventPattern::parse(pattern),
            handler,
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.subscribers.write().retain(|s| s.id != id);
        Ok(())
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<Event>> {
        let events = self.inner.events.read();
        let mut matched: Vec<Event> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn replay_events(&self, filter: EventFilter) -> Result<usize> {
        let matched = self.list_events(filter).await?;
        debug!(count = matched.len(), "replaying events");
        for event in &matched {
            self.notify(event);
        }
        Ok(matched.len())
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    async fn get_artifact(&self, url: &str, ty: &str) -> Result<Option<Artifact>> {
        Ok(self.inner.artifacts.read().get(&(url.to_owned(), ty.to_owned())).cloned())
    }

    async fn set_artifact(&self, url: &str, ty: &str, input: ArtifactInput) -> Result<Artifact> {
        let artifact = Artifact {
            url: url.to_owned(),
            ty: ty.to_owned(),
            source_hash: input.source_hash,
            content: input.content,
            metadata: input.metadata,
            created_at: Utc::now(),
        };
        self.inner
            .artifacts
            .write()
            .insert((url.to_owned(), ty.to_owned()), artifact.clone());
        Ok(artifact)
    }

    async fn delete_artifact(&self, url: &str, ty: Option<&str>) -> Result<usize> {
        let mut artifacts = self.inner.artifacts.write();
        let before = artifacts.len();
        match ty {
            Some(ty) => {
                artifacts.remove(&(url.to_owned(), ty.to_owned()));
            }
            None => artifacts.retain(|(u, _), _| u != url),
        }
        Ok(before - artifacts.len())
    }

    async fn list_artifacts(&self, url_prefix: &str) -> Result<Vec<Artifact>> {
        Ok(self
            .inner
            .artifacts
            .read()
            .values()
            .filter(|a| a.url.starts_with(url_prefix))
            .cloned()
            .collect())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_semantic_search: true,
            supports_hybrid_search: true,
            supports_actions: true,
            supports_events: true,
            supports_artifacts: true,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn as_object(data: Value) -> Result<Data> {
    match data {
        Value::Object(obj) => Ok(obj),
        other => Err(Error::TypeError {
            expected: "object".into(),
            got: crate::model::thing::type_of(&other).into(),
        }),
    }
}

fn with_key(mut item: Value, key: &str, value: Value) -> Value {
    if let Some(obj) = item.as_object_mut() {
        obj.insert(key.to_owned(), value);
    }
    item
}

/// 1-based ranks keyed by `$id` from an already-sorted result list.
fn ranks_by_id(items: &[Value]) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| Some((item.get("$id")?.as_str()?.to_owned(), i + 1)))
        .collect()
}

/// Field comparison for `list` ordering: numbers, strings, and bools
/// compare naturally; missing/null sorts last under ascending.
fn json_field_cmp(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_get() {
        let db = MemoryProvider::new();
        let created = db
            .create("Post", Some("post-1"), json!({ "title": "Hello" }))
            .await
            .unwrap();
        assert_eq!(created.get("$id"), Some(&json!("post-1")));
        assert_eq!(created.get("$type"), Some(&json!("Post")));
        assert!(created.get("createdAt").is_some());

        let fetched = db.get("Post", "post-1").await.unwrap().unwrap();
        assert_eq!(fetched.get("title"), Some(&json!("Hello")));
    }

    #[tokio::test]
    async fn test_create_refuses_duplicates() {
        let db = MemoryProvider::new();
        db.create("Post", Some("p"), json!({})).await.unwrap();
        let err = db.create("Post", Some("p"), json!({})).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_shallow() {
        let db = MemoryProvider::new();
        db.create("Post", Some("p"), json!({ "title": "A", "views": 1 })).await.unwrap();
        let updated = db.update("Post", "p", json!({ "views": 2 })).await.unwrap();
        assert_eq!(updated.get("title"), Some(&json!("A")));
        assert_eq!(updated.get("views"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_upsert_creates_then_merges() {
        let db = MemoryProvider::new();
        let created = db.upsert("Post", "p", json!({ "title": "A" })).await.unwrap();
        assert_eq!(created.get("title"), Some(&json!("A")));
        let merged = db.upsert("Post", "p", json!({ "views": 7 })).await.unwrap();
        assert_eq!(merged.get("title"), Some(&json!("A")));
        assert_eq!(merged.get("views"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_update_missing_is_error() {
        let db = MemoryProvider::new();
        let err = db.update("Post", "nope", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_cascades_relations_and_artifacts() {
        let db = MemoryProvider::new();
        db.create("Post", Some("p"), json!({ "title": "A" })).await.unwrap();
        db.create("Author", Some("a"), json!({ "name": "Ada" })).await.unwrap();
        db.relate("Post", "p", "author", "Author", "a", None).await.unwrap();
        db.relate("Author", "a", "posts", "Post", "p", None).await.unwrap();

        assert!(db.delete("Post", "p").await.unwrap());
        assert!(!db.delete("Post", "p").await.unwrap());
        // Inbound edge from the author side is gone too.
        assert!(db.related("Author", "a", "posts").await.unwrap().is_empty());
        assert!(db.list_artifacts("Post/p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_where_order_paginate() {
        let db = MemoryProvider::new();
        for (id, views, draft) in [("a", 3, false), ("b", 1, false), ("c", 2, true)] {
            db.create("Post", Some(id), json!({ "views": views, "draft": draft }))
                .await
                .unwrap();
        }

        let published = db
            .list("Post", ListOptions::default().where_eq("draft", json!(false)))
            .await
            .unwrap();
        assert_eq!(published.len(), 2);

        let ordered = db
            .list("Post", ListOptions::default().order_by("views", Order::Desc))
            .await
            .unwrap();
        let views: Vec<i64> = ordered.iter().map(|p| p["views"].as_i64().unwrap()).collect();
        assert_eq!(views, vec![3, 2, 1]);

        let page = db
            .list(
                "Post",
                ListOptions::default().order_by("views", Order::Asc).offset(1).limit(1),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["views"], json!(2));
    }

    #[tokio::test]
    async fn test_nulls_sort_last_ascending() {
        let db = MemoryProvider::new();
        db.create("Post", Some("a"), json!({ "rank": 2 })).await.unwrap();
        db.create("Post", Some("b"), json!({})).await.unwrap();
        db.create("Post", Some("c"), json!({ "rank": 1 })).await.unwrap();

        let asc = db.list("Post", ListOptions::default().order_by("rank", Order::Asc)).await.unwrap();
        let ids: Vec<&str> = asc.iter().map(|p| p["$id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let desc = db.list("Post", ListOptions::default().order_by("rank", Order::Desc)).await.unwrap();
        let ids: Vec<&str> = desc.iter().map(|p| p["$id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_relate_is_idempotent() {
        let db = MemoryProvider::new();
        db.create("Post", Some("p"), json!({})).await.unwrap();
        db.create("Tag", Some("t"), json!({})).await.unwrap();
        db.relate("Post", "p", "tags", "Tag", "t", None).await.unwrap();
        db.relate("Post", "p", "tags", "Tag", "t", None).await.unwrap();
        assert_eq!(db.related("Post", "p", "tags").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_relate_missing_entity_is_error() {
        let db = MemoryProvider::new();
        db.create("Post", Some("p"), json!({})).await.unwrap();
        let err = db.relate("Post", "p", "tags", "Tag", "ghost", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_embedding_artifact_regenerated_on_update() {
        let db = MemoryProvider::new();
        db.create("Doc", Some("d"), json!({ "body": "cooking pasta" })).await.unwrap();
        let first = db.get_artifact("Doc/d", EMBEDDING_ARTIFACT).await.unwrap().unwrap();

        db.set_artifact("Doc/d", "summary", ArtifactInput::new("stale", "h")).await.unwrap();
        db.update("Doc", "d", json!({ "body": "typescript compiler" })).await.unwrap();

        let second = db.get_artifact("Doc/d", EMBEDDING_ARTIFACT).await.unwrap().unwrap();
        assert_ne!(first.source_hash, second.source_hash);
        // Non-embedding artifacts were invalidated by the update.
        assert!(db.get_artifact("Doc/d", "summary").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_action_lifecycle() {
        let db = MemoryProvider::new();
        let action = db.create_action(ActionInput::verb("create")).await.unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.act, "creates");
        assert_eq!(action.activity, "creating");

        let active = db
            .update_action(&action.id, ActionUpdate::status(ActionStatus::Active))
            .await
            .unwrap();
        assert!(active.started_at.is_some());

        let done = db
            .update_action(&action.id, ActionUpdate::status(ActionStatus::Completed))
            .await
            .unwrap();
        assert!(done.completed_at.is_some());

        // Terminal actions can't be cancelled.
        assert!(db.cancel_action(&action.id).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_requires_failed() {
        let db = MemoryProvider::new();
        let action = db.create_action(ActionInput::verb("sync")).await.unwrap();
        assert!(db.retry_action(&action.id).await.is_err());

        db.update_action(&action.id, ActionUpdate::status(ActionStatus::Active)).await.unwrap();
        db.update_action(&action.id, ActionUpdate::status(ActionStatus::Failed).error("boom"))
            .await
            .unwrap();
        let retried = db.retry_action(&action.id).await.unwrap();
        assert_eq!(retried.status, ActionStatus::Pending);
        assert_eq!(retried.error, None);
        assert_eq!(retried.completed_at, None);
    }

    #[tokio::test]
    async fn test_action_type_derives_verb_from_last_segment() {
        let db = MemoryProvider::new();
        let action = db.create_action(ActionInput::of_type("Customer.sync")).await.unwrap();
        assert_eq!(action.action, "sync");
        assert_eq!(action.object.as_deref(), Some("Customer.sync"));
    }
}
