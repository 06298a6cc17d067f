//! Domain events and subscription patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An append-only domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_data: Option<Value>,
    /// Event name, `Type.action` by convention (e.g. `Post.created`).
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Input to `emit`. The legacy form carries just a name and payload;
/// the full form mirrors the event record.
#[derive(Debug, Clone, Default)]
pub struct EventInput {
    pub actor: Option<String>,
    pub actor_data: Option<Value>,
    pub event: String,
    pub object: Option<String>,
    pub object_data: Option<Value>,
    pub result: Option<String>,
    pub result_data: Option<Value>,
    pub meta: Option<Value>,
}

impl EventInput {
    /// Legacy `(name, data)` form. The payload lands in `objectData`.
    pub fn legacy(name: impl Into<String>, data: Option<Value>) -> Self {
        Self { event: name.into(), object_data: data, ..Self::default() }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { event: name.into(), ..Self::default() }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn object_data(mut self, data: Value) -> Self {
        self.object_data = Some(data);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Subscription pattern over event names.
///
/// | Pattern | Matches |
/// |---------|---------|
/// | `*` | every event |
/// | `Type.*` | every action on `Type` |
/// | `*.action` | the action on every type |
/// | `Type.action` | exactly that event |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    Any,
    Prefix(String),
    Suffix(String),
    Exact(String),
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            EventPattern::Any
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            EventPattern::Prefix(prefix.to_owned())
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            EventPattern::Suffix(suffix.to_owned())
        } else {
            EventPattern::Exact(pattern.to_owned())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            EventPattern::Any => true,
            EventPattern::Prefix(prefix) => name
                .split_once('.')
                .is_some_and(|(head, _)| head == prefix),
            EventPattern::Suffix(suffix) => name
                .rsplit_once('.')
                .is_some_and(|(_, tail)| tail == suffix),
            EventPattern::Exact(exact) => name == exact,
        }
    }
}

impl std::fmt::Display for EventPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPattern::Any => write!(f, "*"),
            EventPattern::Prefix(p) => write!(f, "{p}.*"),
            EventPattern::Suffix(s) => write!(f, "*.{s}"),
            EventPattern::Exact(e) => write!(f, "{e}"),
        }
    }
}
