//! Durable promise — a future whose lifecycle is mirrored as an Action.
//!
//! | Observable state | Action status |
//! |------------------|---------------|
//! | not yet started | `pending` |
//! | executing | `active` |
//! | fulfilled | `completed` |
//! | rejected | `failed` |
//! | cancelled | `cancelled` |
//!
//! The handle is just a view; the Action record is the durable part.
//! Cancellation is cooperative — waiters are rejected immediately, a
//! running executor is not interrupted.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::warn;

use crate::model::{ActionStatus, ActionUpdate};
use crate::provider::Provider;
use crate::{Error, Result};

use super::Tier;

/// The unit of work a promise executes.
pub type WorkFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value>> + Send>;

/// Wrap a plain async closure as a `WorkFn`.
pub fn work_fn<F, Fut>(f: F) -> WorkFn
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// Observable promise state.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Active,
    Fulfilled(Value),
    Rejected(String),
    Cancelled,
}

impl PromiseState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PromiseState::Fulfilled(_) | PromiseState::Rejected(_) | PromiseState::Cancelled
        )
    }
}

/// A promise-like handle backed by a persisted Action.
pub struct DurablePromise {
    inner: Arc<PromiseInner>,
}

impl Clone for DurablePromise {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct PromiseInner {
    method: String,
    tier: Tier,
    action_id: Option<String>,
    provider: Option<Arc<dyn Provider>>,
    state: watch::Sender<PromiseState>,
}

impl DurablePromise {
    pub(crate) fn new(
        method: impl Into<String>,
        tier: Tier,
        action_id: Option<String>,
        provider: Option<Arc<dyn Provider>>,
    ) -> Self {
        let (state, _) = watch::channel(PromiseState::Pending);
        Self {
            inner: Arc::new(PromiseInner { method: method.into(), tier, action_id, provider, state }),
        }
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    pub fn action_id(&self) -> Option<&str> {
        self.inner.action_id.as_deref()
    }

    pub(crate) fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.inner.provider.clone()
    }

    /// Current state snapshot.
    pub fn state(&self) -> PromiseState {
        self.inner.state.borrow().clone()
    }

    /// Await the terminal state — the future side of the promise.
    pub async fn wait(&self) -> Result<Value> {
        let mut rx = self.inner.state.subscribe();
        let terminal = rx
            .wait_for(PromiseState::is_terminal)
            .await
            .map_err(|_| Error::ExecutionError("durable promise dropped mid-flight".into()))?
            .clone();
        match terminal {
            PromiseState::Fulfilled(value) => Ok(value),
            PromiseState::Rejected(message) => Err(Error::ExecutionError(message)),
            PromiseState::Cancelled => Err(Error::Cancelled(self.inner.method.clone())),
            // wait_for only returns terminal states.
            other => Err(Error::ExecutionError(format!("non-terminal wake: {other:?}"))),
        }
    }

    /// Cancel a non-terminal promise. Waiters are rejected; an executor
    /// already running is not preempted and should watch its own token.
    pub async fn cancel(&self) -> Result<()> {
        let current = self.state();
        if current.is_terminal() {
            return Err(Error::IllegalTransition {
                entity: format!("promise {}", self.inner.method),
                from: format!("{current:?}"),
                to: "cancelled".into(),
            });
        }
        self.inner.state.send_replace(PromiseState::Cancelled);
        if let (Some(provider), Some(action_id)) = (&self.inner.provider, &self.inner.action_id) {
            if let Err(error) = provider.cancel_action(action_id).await {
                warn!(%error, action_id, "failed to cancel backing action");
            }
        }
        Ok(())
    }

    /// Reset a rejected promise to pending (`failed → pending`). The
    /// caller is responsible for resubmitting the work.
    pub async fn retry(&self) -> Result<()> {
        let current = self.state();
        let PromiseState::Rejected(_) = current else {
            return Err(Error::IllegalTransition {
                entity: format!("promise {}", self.inner.method),
                from: format!("{current:?}"),
                to: "pending".into(),
            });
        };
        if let (Some(provider), Some(action_id)) = (&self.inner.provider, &self.inner.action_id) {
            provider.retry_action(action_id).await?;
        }
        self.inner.state.send_replace(PromiseState::Pending);
        Ok(())
    }

    // ========================================================================
    // Internal transitions (driven by the queue)
    // ========================================================================

    pub(crate) async fn mark_active(&self) {
        self.inner.state.send_replace(PromiseState::Active);
        self.update_action(ActionUpdate::status(ActionStatus::Active)).await;
    }

    pub(crate) async fn fulfill(&self, value: Value) {
        // A batch result can land while the promise never went active.
        if matches!(self.state(), PromiseState::Pending) {
            self.mark_active().await;
        }
        self.update_action(
            ActionUpdate::status(ActionStatus::Completed).result(json!({ "value": value })),
        )
        .await;
        self.inner.state.send_replace(PromiseState::Fulfilled(value));
    }

    pub(crate) async fn reject(&self, message: String) {
        if matches!(self.state(), PromiseState::Pending) {
            self.mark_active().await;
        }
        self.update_action(
            ActionUpdate::status(ActionStatus::Failed).error(message.clone()),
        )
        .await;
        self.inner.state.send_replace(PromiseState::Rejected(message));
    }

    pub(crate) async fn set_batch(&self, batch_id: &str, index: usize, total: usize) {
        self.update_action(ActionUpdate {
            batch: Some(batch_id.to_owned()),
            batch_index: Some(index),
            batch_total: Some(total),
            ..ActionUpdate::default()
        })
        .await;
    }

    async fn update_action(&self, update: ActionUpdate) {
        if let (Some(provider), Some(action_id)) = (&self.inner.provider, &self.inner.action_id) {
            if let Err(error) = provider.update_action(action_id, update).await {
                warn!(%error, action_id, "failed to mirror promise state to action");
            }
        }
    }
}
