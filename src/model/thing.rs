//! Thing — the generic entity record addressed by `(type, id)`.
//!
//! A Thing has two isomorphic shapes:
//!
//! | Shape | Keys |
//! |-------|------|
//! | Flat | `$id`, `$type`, optional `$context`, arbitrary data keys |
//! | Expanded | `id`, `type`, `context`, `data`, `content` |
//!
//! `content` is a distinguished string payload: in expanded form it appears
//! both at the top level and inside `data`; flattening emits it once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// The arbitrary key/value body of an entity.
pub type Data = serde_json::Map<String, Value>;

/// Map-key form of an entity address. `Display` renders the compact
/// `type/id` form used for artifact URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThingKey {
    #[serde(rename = "type")]
    pub ty: String,
    pub id: String,
}

impl ThingKey {
    pub fn new(ty: impl Into<String>, id: impl Into<String>) -> Self {
        Self { ty: ty.into(), id: id.into() }
    }
}

impl std::fmt::Display for ThingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ty, self.id)
    }
}

/// Expanded entity shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub data: Data,
    /// Distinguished string payload, mirrored inside `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Thing {
    pub fn key(&self) -> ThingKey {
        ThingKey::new(&self.ty, &self.id)
    }

    /// Expand a flat value. Fails if `$id` or `$type` is absent or not a string.
    pub fn from_flat(flat: &Value) -> Result<Self> {
        let obj = flat
            .as_object()
            .ok_or_else(|| Error::TypeError { expected: "object".into(), got: type_of(flat).into() })?;

        let id = require_str(obj, "$id")?;
        let ty = require_str(obj, "$type")?;
        let context = obj.get("$context").and_then(Value::as_str).map(str::to_owned);

        let mut data = Data::new();
        for (k, v) in obj {
            if k == "$id" || k == "$type" || k == "$context" {
                continue;
            }
            data.insert(k.clone(), v.clone());
        }

        let content = data.get("content").and_then(Value::as_str).map(str::to_owned);

        Ok(Self { id, ty, context, data, content })
    }

    /// Flatten back to the `$`-keyed shape. `content` is emitted exactly once
    /// even though the expanded form carries it in two positions.
    pub fn to_flat(&self) -> Value {
        let mut obj = Data::new();
        obj.insert("$id".into(), Value::String(self.id.clone()));
        obj.insert("$type".into(), Value::String(self.ty.clone()));
        if let Some(ctx) = &self.context {
            obj.insert("$context".into(), Value::String(ctx.clone()));
        }
        for (k, v) in &self.data {
            obj.insert(k.clone(), v.clone());
        }
        // A content payload set only at the top level still flattens.
        if let Some(content) = &self.content {
            if !obj.contains_key("content") {
                obj.insert("content".into(), Value::String(content.clone()));
            }
        }
        Value::Object(obj)
    }
}

fn require_str(obj: &Data, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::InvalidInput(format!("flat entity is missing string '{key}'")))
}

pub(crate) fn type_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
