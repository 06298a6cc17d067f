//! Execution queue and batch scheduler.
//!
//! Four priority tiers, each with a FIFO queue drained through its own
//! counting semaphore — enqueue order is dispatch order within a tier,
//! and at most `concurrency[tier]` executors of a tier run at once.
//! Batch-tier work accumulates instead: a window timer (or the queue
//! hitting `max_batch_size`) flushes it, grouping requests by the first
//! dot-segment of their method and handing each group to a registered
//! `BatchProvider`. Without one, batch work demotes to the standard tier
//! and executes locally.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::{ActionInput, ActionStatus, ActionUpdate};
use crate::provider::{ActionFilter, Provider};
use crate::{Error, Result};

use super::batch::{BatchProvider, BatchRequest, BatchResultStatus};
use super::context::{ExecutionContext, FlushFn};
use super::promise::{DurablePromise, PromiseState, WorkFn};
use super::Tier;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone)]
pub struct QueueConfig {
    /// Semaphore bound per tier, indexed `priority, standard, flex, batch`.
    pub concurrency: [usize; 4],
    /// How long batch work accumulates before auto-flushing.
    pub batch_window: Duration,
    /// Queue size that forces an early flush.
    pub max_batch_size: usize,
    /// Dependency poll interval.
    pub dependency_poll: Duration,
    /// Hard ceiling on dependency waiting.
    pub dependency_ceiling: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: [50, 20, 10, 1000],
            batch_window: Duration::from_secs(60),
            max_batch_size: 10_000,
            dependency_poll: Duration::from_millis(500),
            dependency_ceiling: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub args: Value,
    /// Action ids that must reach a terminal status first.
    pub depends_on: Vec<String>,
    pub defer_until: Option<DateTime<Utc>>,
    pub meta: Option<Value>,
}

impl SubmitOptions {
    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on = ids.into_iter().collect();
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Outcome of crash recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Actions still pending, left untouched.
    pub pending: usize,
    /// Actions found active and failed as interrupted.
    pub interrupted: usize,
}

// ============================================================================
// Queue
// ============================================================================

struct QueuedWork {
    promise: DurablePromise,
    work: WorkFn,
    depends_on: Vec<String>,
}

struct BatchItem {
    promise: DurablePromise,
    work: WorkFn,
    args: Value,
    on_flush: Option<FlushFn>,
}

/// The process-wide scheduler. Cheap to clone; all clones share state.
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

impl Clone for ExecutionQueue {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct QueueInner {
    config: QueueConfig,
    semaphores: [Arc<Semaphore>; 4],
    queues: [Mutex<VecDeque<QueuedWork>>; 4],
    draining: [AtomicBool; 4],
    batch: Mutex<Vec<BatchItem>>,
    batch_timer: Mutex<Option<JoinHandle<()>>>,
    batch_provider: RwLock<Option<Arc<dyn BatchProvider>>>,
}

impl Default for ExecutionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl ExecutionQueue {
    pub fn new(config: QueueConfig) -> Self {
        let semaphores =
            std::array::from_fn(|i| Arc::new(Semaphore::new(config.concurrency[i].max(1))));
        Self {
            inner: Arc::new(QueueInner {
                config,
                semaphores,
                queues: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
                draining: std::array::from_fn(|_| AtomicBool::new(false)),
                batch: Mutex::new(Vec::new()),
                batch_timer: Mutex::new(None),
                batch_provider: RwLock::new(None),
            }),
        }
    }

    /// Register the backend that executes flushed batch groups. Batch
    /// work enqueued without one demotes to the standard tier on flush.
    pub fn register_batch_provider(&self, provider: Arc<dyn BatchProvider>) {
        *self.inner.batch_provider.write() = Some(provider);
    }

    /// Number of batch-tier items currently accumulated.
    pub fn batch_queue_len(&self) -> usize {
        self.inner.batch.lock().len()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Create a durable promise for `(method, args, work)` under the
    /// context's tier/provider/actor, mirror it as an Action, and
    /// schedule it.
    pub async fn submit(
        &self,
        ctx: &Arc<ExecutionContext>,
        method: &str,
        options: SubmitOptions,
        work: WorkFn,
    ) -> Result<DurablePromise> {
        let tier = ctx.tier();
        let provider = ctx.provider();

        let action_id = match &provider {
            Some(provider) => {
                let verb = method.rsplit('.').next().unwrap_or(method);
                let mut object_data = json!({
                    "method": method,
                    "args": options.args.clone(),
                    "priority": tier.numeric(),
                });
                if let Some(key) = ctx.concurrency_key() {
                    object_data["concurrencyKey"] = json!(key);
                }
                if !options.depends_on.is_empty() {
                    object_data["dependsOn"] = json!(options.depends_on);
                }
                if let Some(defer) = options.defer_until {
                    object_data["deferUntil"] = json!(defer.to_rfc3339());
                }
                let mut input = ActionInput::verb(verb)
                    .actor(ctx.actor())
                    .object(method)
                    .object_data(object_data)
                    .priority(tier.numeric());
                if let Some(meta) = options.meta.clone() {
                    input = input.meta(meta);
                }
                input.scheduled_at = options.defer_until;
                Some(provider.create_action(input).await?.id)
            }
            None => None,
        };

        let promise = DurablePromise::new(method, tier, action_id, provider);

        if tier == Tier::Batch {
            let item = BatchItem {
                promise: promise.clone(),
                work,
                args: options.args,
                on_flush: ctx.on_flush(),
            };
            self.enqueue_batch(item, ctx.batch_window());
        } else {
            self.inner.queues[tier.index()].lock().push_back(QueuedWork {
                promise: promise.clone(),
                work,
                depends_on: options.depends_on,
            });
            self.drain(tier);
        }
        Ok(promise)
    }

    // ========================================================================
    // Tier drains
    // ========================================================================

    /// Single drainer per tier: pops in FIFO order, acquires the tier
    /// permit before spawning, so dispatch order is enqueue order and
    /// in-flight work is bounded by the semaphore.
    fn drain(&self, tier: Tier) {
        let idx = tier.index();
        if self.inner.draining[idx].swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                let item = queue.inner.queues[idx].lock().pop_front();
                let Some(item) = item else {
                    queue.inner.draining[idx].store(false, Ordering::SeqCst);
                    // An enqueue may have raced the flag; re-claim or stop.
                    if queue.inner.queues[idx].lock().is_empty()
                        || queue.inner.draining[idx].swap(true, Ordering::SeqCst)
                    {
                        break;
                    }
                    continue;
                };
                let Ok(permit) =
                    Arc::clone(&queue.inner.semaphores[idx]).acquire_owned().await
                else {
                    queue.inner.draining[idx].store(false, Ordering::SeqCst);
                    break;
                };
                let runner = queue.clone();
                tokio::spawn(async move {
                    runner.run_item(item).await;
                    drop(permit);
                });
            }
        });
    }

    async fn run_item(&self, item: QueuedWork) {
        let QueuedWork { promise, work, depends_on } = item;
        if matches!(promise.state(), PromiseState::Cancelled) {
            return;
        }
        if !depends_on.is_empty() {
            if let Some(provider) = promise.provider() {
                if let Err(error) = self.wait_dependencies(&provider, &depends_on).await {
                    promise.reject(error.to_string()).await;
                    return;
                }
            }
        }
        promise.mark_active().await;
        match work().await {
            Ok(value) => promise.fulfill(value).await,
            Err(error) => promise.reject(error.to_string()).await,
        }
    }

    /// Poll until every listed dependency reaches a terminal status.
    async fn wait_dependencies(
        &self,
        provider: &Arc<dyn Provider>,
        depends_on: &[String],
    ) -> Result<()> {
        let ceiling = self.inner.config.dependency_ceiling;
        let deadline = tokio::time::Instant::now() + ceiling;
        loop {
            let open = provider
                .list_actions(ActionFilter {
                    ids: Some(depends_on.to_vec()),
                    statuses: Some(vec![ActionStatus::Pending, ActionStatus::Active]),
                    ..ActionFilter::default()
                })
                .await?;
            if open.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    ms: ceiling.as_millis() as u64,
                    context: format!("waiting on {} dependencies", open.len()),
                });
            }
            tokio::time::sleep(self.inner.config.dependency_poll).await;
        }
    }

    // ========================================================================
    // Batch accumulation
    // ========================================================================

    fn enqueue_batch(&self, item: BatchItem, window_override: Option<Duration>) {
        let force_flush = {
            let mut batch = self.inner.batch.lock();
            batch.push(item);
            batch.len() >= self.inner.config.max_batch_size
        };
        if force_flush {
            let queue = self.clone();
            tokio::spawn(async move {
                if let Err(error) = queue.flush().await {
                    warn!(%error, "forced batch flush failed");
                }
            });
            return;
        }

        let mut timer = self.inner.batch_timer.lock();
        if timer.is_none() {
            let window = window_override.unwrap_or(self.inner.config.batch_window);
            let queue = self.clone();
            *timer = Some(tokio::spawn(async move {
                tokio::time::sleep(window).await;
                // Drop our own handle first so flush() doesn't abort the
                // very task that is running it.
                queue.inner.batch_timer.lock().take();
                if let Err(error) = queue.flush().await {
                    warn!(%error, "batch window flush failed");
                }
            }));
        }
    }

    /// Flush accumulated batch work: group by the first dot-segment of
    /// the method, submit each group to the batch provider (demoting to
    /// standard execution when there is none or submission fails), and
    /// apply streamed results to each promise. Returns the flushed count.
    pub async fn flush(&self) -> Result<usize> {
        if let Some(timer) = self.inner.batch_timer.lock().take() {
            timer.abort();
        }
        let items: Vec<BatchItem> = std::mem::take(&mut *self.inner.batch.lock());
        if items.is_empty() {
            return Ok(0);
        }
        let count = items.len();
        debug!(count, "flushing batch queue");

        let mut flush_callbacks: Vec<FlushFn> = Vec::new();
        for item in &items {
            if let Some(cb) = &item.on_flush {
                if !flush_callbacks.iter().any(|known| Arc::ptr_eq(known, cb)) {
                    flush_callbacks.push(Arc::clone(cb));
                }
            }
        }

        // Group by provider key, preserving enqueue order within groups.
        let mut groups: Vec<(String, Vec<BatchItem>)> = Vec::new();
        for item in items {
            let key = item
                .promise
                .method()
                .split('.')
                .next()
                .unwrap_or_default()
                .to_owned();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(item),
                None => groups.push((key, vec![item])),
            }
        }

        let batch_provider = self.inner.batch_provider.read().clone();
        for (key, group) in groups {
            match &batch_provider {
                Some(bp) => self.submit_group(bp, &key, group).await,
                None => {
                    debug!(key, "no batch provider registered; demoting to standard");
                    self.demote(group);
                }
            }
        }

        for cb in flush_callbacks {
            cb(count);
        }
        Ok(count)
    }

    async fn submit_group(&self, bp: &Arc<dyn BatchProvider>, key: &str, group: Vec<BatchItem>) {
        let total = group.len();
        let requests: Vec<BatchRequest> = group
            .iter()
            .enumerate()
            .map(|(i, item)| BatchRequest {
                custom_id: format!("{key}-{i}"),
                action_id: item.promise.action_id().map(str::to_owned),
                method: item.promise.method().to_owned(),
                args: item.args.clone(),
            })
            .collect();

        let submission = match bp.submit_batch(requests).await {
            Ok(submission) => submission,
            Err(error) => {
                warn!(%error, key, "batch submission failed; demoting to standard");
                self.demote(group);
                return;
            }
        };

        let promises: Vec<DurablePromise> =
            group.iter().map(|item| item.promise.clone()).collect();
        for (i, promise) in promises.into_iter().enumerate() {
            promise.set_batch(&submission.batch_id, i, total).await;
        }

        match bp.stream_results(&submission.batch_id).await {
            Ok(mut results) => {
                let by_custom: HashMap<String, DurablePromise> = group
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (format!("{key}-{i}"), item.promise.clone()))
                    .collect();
                while let Some(result) = results.next().await {
                    let Some(promise) = by_custom.get(&result.custom_id) else {
                        continue;
                    };
                    match result.status {
                        BatchResultStatus::Succeeded => {
                            promise.fulfill(result.result.unwrap_or(Value::Null)).await;
                        }
                        BatchResultStatus::Failed => {
                            promise
                                .reject(
                                    result
                                        .error
                                        .unwrap_or_else(|| "batch item failed".to_owned()),
                                )
                                .await;
                        }
                    }
                }
            }
            Err(error) => {
                warn!(%error, key, "batch result stream failed; demoting to standard");
                self.demote(group);
            }
        }
    }

    fn demote(&self, group: Vec<BatchItem>) {
        {
            let mut queue = self.inner.queues[Tier::Standard.index()].lock();
            for item in group {
                queue.push_back(QueuedWork {
                    promise: item.promise,
                    work: item.work,
                    depends_on: Vec::new(),
                });
            }
        }
        self.drain(Tier::Standard);
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Run at process start against a durable-capable provider: an Action
    /// left `active` was interrupted and fails with an explicit reason;
    /// `pending` Actions are counted and left as-is.
    pub async fn recover(&self, provider: &Arc<dyn Provider>) -> Result<RecoveryReport> {
        let open = provider
            .list_actions(ActionFilter::statuses([ActionStatus::Pending, ActionStatus::Active]))
            .await?;
        let mut report = RecoveryReport::default();
        for action in open {
            match action.status {
                ActionStatus::Pending => report.pending += 1,
                ActionStatus::Active => {
                    provider
                        .update_action(
                            &action.id,
                            ActionUpdate::status(ActionStatus::Failed)
                                .error("interrupted by process restart"),
                        )
                        .await?;
                    report.interrupted += 1;
                }
                _ => {}
            }
        }
        info!(
            pending = report.pending,
            interrupted = report.interrupted,
            "durable recovery complete"
        );
        Ok(report)
    }

    /// Move matching failed Actions back to pending. Returns how many.
    pub async fn retry_failed(
        &self,
        provider: &Arc<dyn Provider>,
        filter: Option<ActionFilter>,
    ) -> Result<usize> {
        let mut filter = filter.unwrap_or_default();
        filter.statuses = Some(vec![ActionStatus::Failed]);
        let failed = provider.list_actions(filter).await?;
        for action in &failed {
            provider.retry_action(&action.id).await?;
        }
        Ok(failed.len())
    }
}
