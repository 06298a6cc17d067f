//! Execution context — a merge-inheriting stack of frames.
//!
//! Each frame may pin a priority tier, a provider, an actor, a
//! concurrency key, a batch window, or a flush callback. A child frame
//! wins where it defines a value and inherits from the nearest ancestor
//! otherwise. New durable promises take their defaults from the current
//! context.

use std::sync::Arc;
use std::time::Duration;

use crate::provider::Provider;

use super::Tier;

/// Callback invoked with the flushed item count when a batch flush the
/// context contributed to completes.
pub type FlushFn = Arc<dyn Fn(usize) + Send + Sync>;

/// One frame of the context stack. Unset fields inherit.
#[derive(Clone, Default)]
pub struct ContextFrame {
    pub tier: Option<Tier>,
    pub provider: Option<Arc<dyn Provider>>,
    pub concurrency_key: Option<String>,
    pub actor: Option<String>,
    pub batch_window: Option<Duration>,
    pub on_flush: Option<FlushFn>,
}

impl ContextFrame {
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn concurrency_key(mut self, key: impl Into<String>) -> Self {
        self.concurrency_key = Some(key.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn batch_window(mut self, window: Duration) -> Self {
        self.batch_window = Some(window);
        self
    }

    pub fn on_flush(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_flush = Some(Arc::new(f));
        self
    }
}

/// An immutable context node; children link back to their parent, so
/// pushing a frame is allocation of one node and popping is dropping it.
pub struct ExecutionContext {
    frame: ContextFrame,
    parent: Option<Arc<ExecutionContext>>,
}

impl ExecutionContext {
    pub fn root() -> Arc<Self> {
        Arc::new(Self { frame: ContextFrame::default(), parent: None })
    }

    pub fn with_frame(frame: ContextFrame) -> Arc<Self> {
        Arc::new(Self { frame, parent: None })
    }

    /// Push a merged child frame.
    pub fn child(self: &Arc<Self>, delta: ContextFrame) -> Arc<Self> {
        Arc::new(Self { frame: delta, parent: Some(Arc::clone(self)) })
    }

    fn lookup<T>(&self, get: impl Fn(&ContextFrame) -> Option<T>) -> Option<T> {
        let mut node = Some(self);
        while let Some(ctx) = node {
            if let Some(value) = get(&ctx.frame) {
                return Some(value);
            }
            node = ctx.parent.as_deref();
        }
        None
    }

    /// Effective tier; `standard` when no frame pins one.
    pub fn tier(&self) -> Tier {
        self.lookup(|f| f.tier).unwrap_or(Tier::Standard)
    }

    pub fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.lookup(|f| f.provider.clone())
    }

    pub fn concurrency_key(&self) -> Option<String> {
        self.lookup(|f| f.concurrency_key.clone())
    }

    /// Effective actor; `system` when no frame pins one.
    pub fn actor(&self) -> String {
        self.lookup(|f| f.actor.clone()).unwrap_or_else(|| "system".to_owned())
    }

    pub fn batch_window(&self) -> Option<Duration> {
        self.lookup(|f| f.batch_window)
    }

    pub fn on_flush(&self) -> Option<FlushFn> {
        self.lookup(|f| f.on_flush.clone())
    }
}

/// Run `f` under a child context. The frame pops when the future
/// completes (the child node is dropped).
pub async fn with_context<T, F, Fut>(ctx: &Arc<ExecutionContext>, delta: ContextFrame, f: F) -> T
where
    F: FnOnce(Arc<ExecutionContext>) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    f(ctx.child(delta)).await
}
