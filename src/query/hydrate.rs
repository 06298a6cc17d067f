//! Two-phase `map` execution with batched relation hydration.
//!
//! Phase 1 records which relations the callback touches (see
//! `recording`). Phase 2 collates relation ids across every item,
//! deduplicates them, loads each distinct entity once (fan-out through
//! `futures::join_all`), recursing into nested relation access. Phase 3
//! reruns the callback over items whose relation fields now hold the
//! hydrated payloads.
//!
//! For N items touching K relations, hydration issues at most N×K
//! deduplicated `get`s — never N×K×depth.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture, FutureExt};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

use super::recording::{ItemView, MapRecording, RelationRecording};
use super::{MapFn, QueryContext};

/// Run a `map` callback over `items` with batch relation hydration.
pub(crate) async fn run_map(
    items: &[Value],
    cb: &MapFn,
    ctx: &QueryContext,
    fallback_ty: Option<&str>,
) -> Result<Vec<Value>> {
    // Recording pass. Callback errors are swallowed here; the real pass
    // surfaces them.
    let rec = Arc::new(Mutex::new(MapRecording::default()));
    for (i, item) in items.iter().enumerate() {
        let view = ItemView::recording(item, Arc::clone(&rec), Arc::clone(&ctx.relations), fallback_ty);
        let _ = cb(&view, i);
    }
    let recording = std::mem::take(&mut *rec.lock());

    // No relation access: plain synchronous mapping semantics.
    if recording.relations.is_empty() {
        return items
            .iter()
            .enumerate()
            .map(|(i, item)| cb(&ItemView::real(item), i))
            .collect();
    }

    let enriched = hydrate_items(items, &recording, ctx, fallback_ty).await?;
    enriched
        .iter()
        .enumerate()
        .map(|(i, item)| cb(&ItemView::real(item), i))
        .collect()
}

/// Replace recorded relation fields on each item with hydrated entities.
pub(crate) async fn hydrate_items(
    items: &[Value],
    recording: &MapRecording,
    ctx: &QueryContext,
    fallback_ty: Option<&str>,
) -> Result<Vec<Value>> {
    let mut enriched: Vec<Value> = items.to_vec();
    let no_extra = HashSet::new();
    hydrate_level(
        &mut enriched,
        fallback_ty.map(str::to_owned),
        &recording.relations,
        &no_extra,
        ctx,
    )
    .await?;
    Ok(enriched)
}

/// One level of hydration: load every relation recorded at this depth,
/// recurse into nested recordings, then substitute the loaded entities
/// into the owning values.
fn hydrate_level<'a>(
    entities: &'a mut [Value],
    owner_ty: Option<String>,
    relations: &'a HashMap<String, RelationRecording>,
    extra_paths: &'a HashSet<String>,
    ctx: &'a QueryContext,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let fields: Vec<&String> = relations
            .keys()
            .chain(extra_paths.iter().filter(|p| !relations.contains_key(*p)))
            .collect();

        for field in fields {
            let rec = relations.get(field);
            // Type from the recording, else the schema relation table;
            // still unknown means this relation is skipped.
            let target = rec
                .and_then(|r| r.ty.clone())
                .or_else(|| {
                    owner_ty
                        .as_deref()
                        .and_then(|ty| ctx.relations.relation(ty, field))
                        .map(|r| r.target.clone())
                });
            let Some(target) = target else {
                continue;
            };

            let ids = collect_ids(entities, field);
            if ids.is_empty() {
                continue;
            }
            let provider = ctx.provider.as_ref().ok_or_else(|| {
                Error::ExecutionError("relation hydration requires a provider".into())
            })?;

            debug!(field, target = %target, count = ids.len(), "hydrating relation batch");
            let fetched = join_all(ids.iter().map(|id| provider.get(&target, id))).await;
            let mut loaded: HashMap<String, Value> = HashMap::new();
            for (id, result) in ids.iter().zip(fetched) {
                if let Some(entity) = result? {
                    loaded.insert(id.clone(), entity);
                }
            }

            // Recurse into nested access before substituting.
            if let Some(rec) = rec {
                if !rec.nested.is_empty() || !rec.nested_paths.is_empty() {
                    let order: Vec<String> = ids.iter().filter(|id| loaded.contains_key(*id)).cloned().collect();
                    let mut values: Vec<Value> =
                        order.iter().filter_map(|id| loaded.remove(id)).collect();
                    hydrate_level(
                        &mut values,
                        Some(target.clone()),
                        &rec.nested,
                        &rec.nested_paths,
                        ctx,
                    )
                    .await?;
                    loaded = order.into_iter().zip(values).collect();
                }
            }

            substitute(entities, field, &loaded);
        }
        Ok(())
    }
    .boxed()
}

/// Distinct relation ids across all entities, in first-seen order.
fn collect_ids(entities: &[Value], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for entity in entities {
        match entity.get(field) {
            Some(Value::String(id)) => {
                if seen.insert(id.clone()) {
                    ids.push(id.clone());
                }
            }
            Some(Value::Array(items)) => {
                for id in items.iter().filter_map(Value::as_str) {
                    if seen.insert(id.to_owned()) {
                        ids.push(id.to_owned());
                    }
                }
            }
            // Objects are already hydrated; anything else isn't a reference.
            _ => {}
        }
    }
    ids
}

/// Swap reference ids for loaded entities. Ids that failed to load are
/// left in place.
fn substitute(entities: &mut [Value], field: &str, loaded: &HashMap<String, Value>) {
    for entity in entities {
        let Some(obj) = entity.as_object_mut() else {
            continue;
        };
        match obj.get(field) {
            Some(Value::String(id)) => {
                if let Some(hydrated) = loaded.get(id) {
                    obj.insert(field.to_owned(), hydrated.clone());
                }
            }
            Some(Value::Array(items)) => {
                let replaced: Vec<Value> = items
                    .iter()
                    .map(|v| match v.as_str().and_then(|id| loaded.get(id)) {
                        Some(hydrated) => hydrated.clone(),
                        None => v.clone(),
                    })
                    .collect();
                obj.insert(field.to_owned(), Value::Array(replaced));
            }
            _ => {}
        }
    }
}
