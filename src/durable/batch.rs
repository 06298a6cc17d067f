//! Batch provider contract.
//!
//! Batch-tier work is not executed locally: accumulated requests are
//! grouped by provider key (the first dot-segment of their method) and
//! handed to a registered `BatchProvider`, which reports per-item
//! results as a lazy stream.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// One request inside a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Caller-side correlation id, unique within the batch.
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub method: String,
    pub args: Value,
}

/// Acknowledgement of a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub batch_id: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Coarse progress of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: String,
    pub status: String,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchResultStatus {
    Succeeded,
    Failed,
}

/// Per-item outcome streamed back from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub status: BatchResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A backend capable of executing grouped batch requests.
#[async_trait]
pub trait BatchProvider: Send + Sync + 'static {
    async fn submit_batch(&self, requests: Vec<BatchRequest>) -> Result<BatchSubmission>;

    async fn get_batch_status(&self, batch_id: &str) -> Result<BatchStatus>;

    /// Lazy sequence of per-item results. Item order within the batch is
    /// provider-defined.
    async fn stream_results(&self, batch_id: &str) -> Result<BoxStream<'static, BatchResult>>;
}
