//! Access recording for `map` callbacks.
//!
//! A `map` callback runs twice. The first (recording) pass hands it
//! `ItemView`s that note every field read and detect relation access —
//! a string id on a schema relation field, or a value already carrying a
//! `$type` marker. The second (real) pass hands it views over enriched
//! items where recorded relation fields hold hydrated entities.
//!
//! Callbacks must read fields through the view for the recording to see
//! them; that is the statically-typed stand-in for property interception.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde_json::Value;
use smallvec::SmallVec;

use crate::schema::RelationInfo;

/// Marker type meaning "relation, target unknown" — resolution falls
/// back to the schema relation table.
const UNKNOWN_TYPE: &str = "unknown";

// ============================================================================
// Recording state
// ============================================================================

/// Everything one recording pass learned across all items.
#[derive(Debug, Default)]
pub struct MapRecording {
    /// Top-level fields the callback read.
    pub paths: HashSet<String>,
    /// Relation fields the callback read, keyed by field name.
    pub relations: HashMap<String, RelationRecording>,
}

impl MapRecording {
    /// Walk `path` through the relation tree, if recorded.
    fn node_at(&mut self, path: &[String]) -> Option<&mut RelationRecording> {
        let (first, rest) = path.split_first()?;
        let mut node = self.relations.get_mut(first)?;
        for segment in rest {
            node = node.nested.get_mut(segment)?;
        }
        Some(node)
    }
}

/// Access pattern observed for one relation field.
#[derive(Debug, Default)]
pub struct RelationRecording {
    /// Target type when known; `None` defers to the schema table.
    pub ty: Option<String>,
    pub is_array: bool,
    /// Fields read on the related entity.
    pub nested_paths: HashSet<String>,
    /// Relations read on the related entity, created lazily.
    pub nested: HashMap<String, RelationRecording>,
}

// ============================================================================
// Item view
// ============================================================================

enum Mode {
    Recording {
        rec: Arc<Mutex<MapRecording>>,
        info: Arc<RelationInfo>,
        /// `$type` of the item, falling back to the query's type.
        item_ty: Option<String>,
    },
    Real,
}

/// The value handed to a `map` callback.
pub struct ItemView<'a> {
    item: &'a Value,
    mode: Mode,
}

impl<'a> ItemView<'a> {
    pub(crate) fn recording(
        item: &'a Value,
        rec: Arc<Mutex<MapRecording>>,
        info: Arc<RelationInfo>,
        fallback_ty: Option<&str>,
    ) -> Self {
        let item_ty = item
            .get("$type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| fallback_ty.map(str::to_owned));
        Self { item, mode: Mode::Recording { rec, info, item_ty } }
    }

    pub(crate) fn real(item: &'a Value) -> Self {
        Self { item, mode: Mode::Real }
    }

    /// The whole (possibly enriched) item.
    pub fn value(&self) -> &Value {
        self.item
    }

    pub fn id(&self) -> Option<&str> {
        self.item.get("$id").and_then(Value::as_str)
    }

    /// Read a field. During recording this notes the access and flags
    /// relation fields for batch hydration.
    pub fn get(&self, field: &str) -> FieldView {
        let raw = self.item.get(field).cloned().unwrap_or(Value::Null);
        match &self.mode {
            Mode::Real => FieldView { value: raw, track: None },
            Mode::Recording { rec, info, item_ty } => {
                let mut guard = rec.lock();
                guard.paths.insert(field.to_owned());

                let detected = detect_relation(&raw, item_ty.as_deref(), field, info);
                match detected {
                    Some((ty, is_array)) => {
                        let node = guard.relations.entry(field.to_owned()).or_default();
                        if node.ty.is_none() {
                            node.ty = ty.clone();
                        }
                        node.is_array |= is_array;
                        let resolved_ty = node.ty.clone();
                        drop(guard);
                        FieldView {
                            value: raw,
                            track: Some(Track {
                                rec: Arc::clone(rec),
                                info: Arc::clone(info),
                                path: SmallVec::from_iter([field.to_owned()]),
                                ty: resolved_ty,
                            }),
                        }
                    }
                    None => FieldView { value: raw, track: None },
                }
            }
        }
    }
}

/// Classify a field value as a relation access. Returns the inferred
/// target type (when resolvable) and whether it's an array relation.
fn detect_relation(
    raw: &Value,
    item_ty: Option<&str>,
    field: &str,
    info: &RelationInfo,
) -> Option<(Option<String>, bool)> {
    let schema_target =
        item_ty.and_then(|ty| info.relation(ty, field)).map(|r| r.target.clone());

    match raw {
        // Already-hydrated single entity.
        Value::Object(obj) => {
            let marker = obj.get("$type").and_then(Value::as_str)?;
            Some((resolve_marker(marker, schema_target), false))
        }
        // A string id on a known relation field.
        Value::String(_) => schema_target.map(|t| (Some(t), false)),
        Value::Array(items) => {
            if let Some(first) = items.iter().find_map(|v| v.as_object()) {
                let marker = first.get("$type").and_then(Value::as_str)?;
                return Some((resolve_marker(marker, schema_target), true));
            }
            if items.iter().all(Value::is_string) {
                return schema_target.map(|t| (Some(t), true));
            }
            None
        }
        _ => None,
    }
}

fn resolve_marker(marker: &str, schema_target: Option<String>) -> Option<String> {
    if marker == UNKNOWN_TYPE {
        schema_target
    } else {
        Some(marker.to_owned())
    }
}

// ============================================================================
// Field view
// ============================================================================

struct Track {
    rec: Arc<Mutex<MapRecording>>,
    info: Arc<RelationInfo>,
    /// Chain of relation field names from the item root.
    path: SmallVec<[String; 4]>,
    /// Target type of the relation at `path`.
    ty: Option<String>,
}

/// A field value read through an `ItemView`. Nested reads on relation
/// fields descend into the recording.
pub struct FieldView {
    value: Value,
    track: Option<Track>,
}

impl FieldView {
    /// Read a nested field. On a recorded relation this notes the nested
    /// path, and lazily opens a nested relation recording when the schema
    /// (or a `$type` marker) says the nested field is itself a relation.
    pub fn get(&self, field: &str) -> FieldView {
        let raw = self.value.get(field).cloned().unwrap_or(Value::Null);
        let Some(track) = &self.track else {
            return FieldView { value: raw, track: None };
        };

        let nested_target = track
            .ty
            .as_deref()
            .and_then(|ty| track.info.relation(ty, field))
            .map(|r| (r.target.clone(), r.is_array))
            .or_else(|| {
                raw.get("$type")
                    .and_then(Value::as_str)
                    .filter(|m| *m != UNKNOWN_TYPE)
                    .map(|m| (m.to_owned(), false))
            });

        let mut guard = track.rec.lock();
        if let Some(node) = guard.node_at(&track.path) {
            node.nested_paths.insert(field.to_owned());
            if let Some((target, is_array)) = &nested_target {
                let child = node.nested.entry(field.to_owned()).or_default();
                if child.ty.is_none() {
                    child.ty = Some(target.clone());
                }
                child.is_array |= *is_array;
            }
        }
        drop(guard);

        let track = nested_target.map(|(target, _)| {
            let mut path = track.path.clone();
            path.push(field.to_owned());
            Track {
                rec: Arc::clone(&track.rec),
                info: Arc::clone(&track.info),
                path,
                ty: Some(target),
            }
        });
        FieldView { value: raw, track }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }
}
