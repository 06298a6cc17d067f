//! Artifacts — derived content stored under an entity URL and a type tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Artifact type tag for stored embeddings. Embedding artifacts survive
/// entity updates (they are regenerated in place); every other artifact
/// under the entity's URL prefix is invalidated.
pub const EMBEDDING_ARTIFACT: &str = "embedding";

/// A derived piece of content keyed by `(url, type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Compact entity URL, `type/id`.
    pub url: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub source_hash: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Input to `set_artifact`.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    pub content: String,
    pub source_hash: String,
    pub metadata: Option<Value>,
}

impl ArtifactInput {
    pub fn new(content: impl Into<String>, source_hash: impl Into<String>) -> Self {
        Self { content: content.into(), source_hash: source_hash.into(), metadata: None }
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
