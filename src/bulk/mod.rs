//! # Bulk processor
//!
//! Concurrency-limited, resumable processing of an item array with
//! retries, per-item timeout, cooperative cancellation, and progress
//! persisted as an Action.
//!
//! Guarantees:
//! - exactly one terminal event per item (completed, failed, or skipped);
//! - `completed + failed + skipped ≤ total`, equal when not cancelled;
//! - dispatch in array order; with `concurrency = 1` items never overlap.
//!
//! Persistence writes the processed-id set into the Action's data every
//! ten terminal events and at the end, so a killed run can resume by
//! action id and skip what it already did.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use hashbrown::HashSet;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{ActionInput, ActionStatus, ActionUpdate};
use crate::provider::Provider;
use crate::{Error, Result};

// ============================================================================
// Callbacks & options
// ============================================================================

/// Per-item callback.
pub type ItemFn = Arc<dyn Fn(Value, usize) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap a plain async closure as an `ItemFn`.
pub fn item_fn<F, Fut>(f: F) -> ItemFn
where
    F: Fn(Value, usize) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |item, index| f(item, index).boxed())
}

/// What to do with a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Record the failure and move on (default).
    Continue,
    /// Try the item again, up to `max_retries`.
    Retry,
    /// Count the item as skipped, no error recorded.
    Skip,
    /// Record the failure and stop scheduling further items.
    Stop,
}

/// Error policy: a fixed decision or a per-error handler.
#[derive(Clone)]
pub enum OnError {
    Decision(ErrorDecision),
    Handler(Arc<dyn Fn(&Error, &Value, usize) -> ErrorDecision + Send + Sync>),
}

impl Default for OnError {
    fn default() -> Self {
        OnError::Decision(ErrorDecision::Continue)
    }
}

/// Backoff between retry attempts.
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(Duration),
    /// Attempt number (1-based) → delay.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryDelay {
    fn delay(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::Fixed(d) => *d,
            RetryDelay::Custom(f) => f(attempt),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed(Duration::from_millis(1000))
    }
}

/// Progress persistence mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Persist {
    #[default]
    Off,
    /// Persist under the default action type (`Type.forEach`).
    On,
    /// Persist under an explicit action type.
    Named(String),
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;
pub type CompleteFn = Arc<dyn Fn(&Value, &Value, usize) + Send + Sync>;

/// Options for `for_each`. All optional; defaults in field docs.
#[derive(Clone)]
pub struct ForEachOptions {
    /// Max in-flight callbacks (1).
    pub concurrency: usize,
    /// Page size reserved for streaming providers (100).
    pub batch_size: usize,
    /// Extra attempts for transient failures (0).
    pub max_retries: u32,
    /// Backoff between attempts (1000 ms).
    pub retry_delay: RetryDelay,
    /// Per-item deadline (none).
    pub timeout: Option<Duration>,
    /// Failure policy (continue).
    pub on_error: OnError,
    /// Called after every terminal item event.
    pub on_progress: Option<ProgressFn>,
    /// Called on each success with (item, result, index).
    pub on_complete: Option<CompleteFn>,
    /// External cancellation.
    pub signal: Option<CancellationToken>,
    /// Persisted progress (off).
    pub persist: Persist,
    /// Action id of a previous run to continue.
    pub resume: Option<String>,
}

impl Default for ForEachOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            batch_size: 100,
            max_retries: 0,
            retry_delay: RetryDelay::default(),
            timeout: None,
            on_error: OnError::default(),
            on_progress: None,
            on_complete: None,
            signal: None,
            persist: Persist::Off,
            resume: None,
        }
    }
}

impl ForEachOptions {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = RetryDelay::Fixed(delay);
        self
    }

    pub fn retry_delay_fn(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.retry_delay = RetryDelay::Custom(Arc::new(f));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_error(mut self, decision: ErrorDecision) -> Self {
        self.on_error = OnError::Decision(decision);
        self
    }

    pub fn on_error_fn(
        mut self,
        f: impl Fn(&Error, &Value, usize) -> ErrorDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_error = OnError::Handler(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&Value, &Value, usize) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn persist(mut self) -> Self {
        self.persist = Persist::On;
        self
    }

    pub fn persist_as(mut self, action_type: impl Into<String>) -> Self {
        self.persist = Persist::Named(action_type.into());
        self
    }

    pub fn resume(mut self, action_id: impl Into<String>) -> Self {
        self.resume = Some(action_id.into());
        self
    }
}

// ============================================================================
// Progress & report
// ============================================================================

/// Snapshot handed to `on_progress` after each terminal event.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Index of the item that just terminated.
    pub index: usize,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Id of that item, when it has one.
    pub current: Option<String>,
    pub elapsed: Duration,
    /// Extrapolated from the rate so far.
    pub remaining: Option<Duration>,
    /// Terminal events per second.
    pub rate: f64,
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ItemError {
    pub item: Value,
    pub error: String,
    pub index: usize,
}

/// Outcome of a bulk run.
#[derive(Debug, Clone)]
pub struct ForEachReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
    pub action_id: Option<String>,
}

// ============================================================================
// Runner
// ============================================================================

/// How many terminal events between persisted checkpoints.
const CHECKPOINT_EVERY: usize = 10;

#[derive(Default)]
struct BulkState {
    completed: usize,
    failed: usize,
    skipped: usize,
    errors: Vec<ItemError>,
    /// Successfully processed ids, insertion order (this is what persists).
    processed: Vec<String>,
    processed_set: HashSet<String>,
    terminal_events: usize,
    stopped: bool,
}

struct Worker {
    cb: ItemFn,
    opts: ForEachOptions,
    state: Mutex<BulkState>,
    actions: Option<Arc<dyn Provider>>,
    action_id: Option<String>,
    total: usize,
    start: Instant,
}

/// Run `cb` over `items` under the given options. `actions` supplies the
/// actions API used for persistence; `default_action_type` names fresh
/// persisted runs (`Type.forEach`).
pub async fn for_each(
    items: Vec<Value>,
    cb: ItemFn,
    options: ForEachOptions,
    actions: Option<Arc<dyn Provider>>,
    default_action_type: &str,
) -> Result<ForEachReport> {
    let wants_persist = options.persist != Persist::Off || options.resume.is_some();
    if wants_persist && actions.is_none() {
        return Err(Error::InvalidInput(
            "forEach persistence requires an actions API".into(),
        ));
    }

    let total = items.len();
    let mut state = BulkState::default();
    let mut action_id = None;

    if let Some(provider) = actions.as_ref().filter(|_| wants_persist) {
        if let Some(resume_id) = &options.resume {
            // Continue a previous run: seed the processed set and go active.
            let action = provider
                .get_action(resume_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("action {resume_id}")))?;
            // A crash-recovered run arrives here as failed; retry it back
            // to pending so the activation below is a legal transition.
            if action.status == ActionStatus::Failed {
                provider.retry_action(resume_id).await?;
            }
            let processed: Vec<String> = action
                .data
                .as_ref()
                .and_then(|d| d.get("processedIds"))
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_default();
            state.processed_set = processed.iter().cloned().collect();
            state.processed = processed;
            provider
                .update_action(
                    resume_id,
                    ActionUpdate::status(ActionStatus::Active).total(total as u64),
                )
                .await?;
            action_id = Some(resume_id.clone());
        } else {
            let action_type = match &options.persist {
                Persist::Named(name) => name.clone(),
                _ => default_action_type.to_owned(),
            };
            let action = provider
                .create_action(
                    ActionInput::of_type(action_type)
                        .data(json!({ "processedIds": [] }))
                        .total(total as u64),
                )
                .await?;
            provider
                .update_action(&action.id, ActionUpdate::status(ActionStatus::Active))
                .await?;
            action_id = Some(action.id);
        }
    }

    let worker = Arc::new(Worker {
        cb,
        opts: options,
        state: Mutex::new(state),
        actions: actions.filter(|_| wants_persist),
        action_id,
        total,
        start: Instant::now(),
    });

    let semaphore = Arc::new(Semaphore::new(worker.opts.concurrency.max(1)));
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut cancelled = false;

    for (index, item) in items.into_iter().enumerate() {
        if worker.is_cancelled() {
            cancelled = true;
            break;
        }

        let id = item_identity(&item);
        // Already done in a previous run: one skipped terminal event.
        if worker.state.lock().processed_set.contains(&id) {
            worker.terminal(index, &id, Terminal::Skipped, None).await;
            continue;
        }

        // Acquiring in the dispatch loop keeps dispatch order = array order.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let worker = Arc::clone(&worker);
        tasks.spawn(async move {
            worker.process(item, index, id).await;
            drop(permit);
        });
    }

    while tasks.join_next().await.is_some() {}

    cancelled = cancelled || worker.is_cancelled();
    worker.finalize(cancelled).await;

    let state = worker.state.lock();
    Ok(ForEachReport {
        total,
        completed: state.completed,
        failed: state.failed,
        skipped: state.skipped,
        elapsed: worker.start.elapsed(),
        errors: state.errors.clone(),
        cancelled,
        action_id: worker.action_id.clone(),
    })
}

enum Terminal {
    Completed,
    Failed(String),
    Skipped,
}

impl Worker {
    fn is_cancelled(&self) -> bool {
        self.state.lock().stopped
            || self.opts.signal.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    async fn process(&self, item: Value, index: usize, id: String) {
        let mut attempt: u32 = 0;
        loop {
            // Cancellation is checked before each attempt; an in-flight
            // callback is never interrupted.
            if attempt > 0 && self.is_cancelled() {
                return;
            }

            let run = (self.cb)(item.clone(), index);
            let result = match self.opts.timeout {
                Some(deadline) => match tokio::time::timeout(deadline, run).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        ms: deadline.as_millis() as u64,
                        context: format!("item {index}"),
                    }),
                },
                None => run.await,
            };

            match result {
                Ok(output) => {
                    self.terminal(index, &id, Terminal::Completed, None).await;
                    if let Some(on_complete) = &self.opts.on_complete {
                        on_complete(&item, &output, index);
                    }
                    return;
                }
                Err(error) => {
                    let decision = match &self.opts.on_error {
                        OnError::Decision(d) => *d,
                        OnError::Handler(f) => f(&error, &item, index),
                    };
                    match decision {
                        ErrorDecision::Retry if attempt < self.opts.max_retries => {
                            attempt += 1;
                            let delay = self.opts.retry_delay.delay(attempt);
                            debug!(index, attempt, ?delay, "retrying item");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        ErrorDecision::Skip => {
                            self.terminal(index, &id, Terminal::Skipped, None).await;
                            return;
                        }
                        ErrorDecision::Stop => {
                            self.terminal(
                                index,
                                &id,
                                Terminal::Failed(error.to_string()),
                                Some(item),
                            )
                            .await;
                            self.state.lock().stopped = true;
                            return;
                        }
                        // Continue, or Retry with attempts exhausted.
                        _ => {
                            self.terminal(
                                index,
                                &id,
                                Terminal::Failed(error.to_string()),
                                Some(item),
                            )
                            .await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Record the single terminal event for an item, fire progress, and
    /// checkpoint when due.
    async fn terminal(&self, index: usize, id: &str, outcome: Terminal, item: Option<Value>) {
        let (progress, checkpoint) = {
            let mut state = self.state.lock();
            match outcome {
                Terminal::Completed => {
                    state.completed += 1;
                    if state.processed_set.insert(id.to_owned()) {
                        state.processed.push(id.to_owned());
                    }
                }
                Terminal::Failed(error) => {
                    state.failed += 1;
                    state.errors.push(ItemError {
                        item: item.unwrap_or(Value::Null),
                        error,
                        index,
                    });
                }
                Terminal::Skipped => state.skipped += 1,
            }
            state.terminal_events += 1;
            let checkpoint = (state.terminal_events % CHECKPOINT_EVERY == 0)
                .then(|| state.processed.clone());
            (self.progress_snapshot(&state, index, id), checkpoint)
        };

        if let Some(processed) = checkpoint {
            self.checkpoint(processed, progress.completed).await;
        }
        if let Some(on_progress) = &self.opts.on_progress {
            on_progress(&progress);
        }
    }

    fn progress_snapshot(&self, state: &BulkState, index: usize, id: &str) -> Progress {
        let elapsed = self.start.elapsed();
        let done = state.completed + state.failed + state.skipped;
        let rate = if elapsed.as_secs_f64() > 0.0 {
            done as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let remaining = (done > 0 && rate > 0.0).then(|| {
            Duration::from_secs_f64((self.total.saturating_sub(done)) as f64 / rate)
        });
        Progress {
            index,
            total: self.total,
            completed: state.completed,
            failed: state.failed,
            skipped: state.skipped,
            current: (!id.is_empty()).then(|| id.to_owned()),
            elapsed,
            remaining,
            rate,
        }
    }

    async fn checkpoint(&self, processed: Vec<String>, completed: usize) {
        let (Some(provider), Some(action_id)) = (&self.actions, &self.action_id) else {
            return;
        };
        let update = ActionUpdate::default()
            .progress(completed as u64)
            .data(json!({ "processedIds": processed }));
        if let Err(error) = provider.update_action(action_id, update).await {
            warn!(%error, action_id, "bulk checkpoint failed");
        }
    }

    async fn finalize(&self, cancelled: bool) {
        let (Some(provider), Some(action_id)) = (&self.actions, &self.action_id) else {
            return;
        };
        let (processed, completed, failed, skipped) = {
            let state = self.state.lock();
            (state.processed.clone(), state.completed, state.failed, state.skipped)
        };
        let status = if cancelled {
            ActionStatus::Cancelled
        } else if failed > 0 && completed == 0 {
            ActionStatus::Failed
        } else {
            ActionStatus::Completed
        };
        let mut update = ActionUpdate::status(status)
            .progress(completed as u64)
            .data(json!({ "processedIds": processed }))
            .result(json!({
                "completed": completed,
                "failed": failed,
                "skipped": skipped,
            }));
        if failed > 0 {
            update = update.error(format!("{failed} of {} items failed", self.total));
        }
        if let Err(error) = provider.update_action(action_id, update).await {
            warn!(%error, action_id, "bulk finalize failed");
        }
    }
}

/// Identity used for the processed set: `$id`, then `id`, then the
/// serialized item itself.
fn item_identity(item: &Value) -> String {
    item.get("$id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| item.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn items(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({ "$id": format!("item-{i}"), "n": i })).collect()
    }

    #[tokio::test]
    async fn test_counts_add_up() {
        let report = for_each(
            items(10),
            item_fn(|item, _| async move {
                if item["n"].as_u64().unwrap() % 3 == 0 {
                    Err(Error::ExecutionError("odd one out".into()))
                } else {
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default(),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();

        assert_eq!(report.total, 10);
        assert_eq!(report.completed + report.failed + report.skipped, 10);
        assert_eq!(report.failed, 4);
        assert_eq!(report.errors.len(), report.failed);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_sequential_dispatch_preserves_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let report = for_each(
            items(5),
            item_fn(move |_, index| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(index);
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default(),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();
        assert_eq!(report.completed, 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (inf, pk) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let report = for_each(
            items(20),
            item_fn(move |_, _| {
                let (inf, pk) = (Arc::clone(&inf), Arc::clone(&pk));
                async move {
                    let now = inf.fetch_add(1, Ordering::SeqCst) + 1;
                    pk.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inf.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default().concurrency(4),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();

        assert_eq!(report.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_retry_policy() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let report = for_each(
            items(1),
            item_fn(move |_, _| {
                let seen = Arc::clone(&seen);
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::ExecutionError("transient".into()))
                    } else {
                        Ok(Value::Null)
                    }
                }
            }),
            ForEachOptions::default()
                .on_error(ErrorDecision::Retry)
                .max_retries(3)
                .retry_delay(Duration::from_millis(1)),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails() {
        let report = for_each(
            items(1),
            item_fn(|_, _| async { Err(Error::ExecutionError("always".into())) }),
            ForEachOptions::default()
                .on_error(ErrorDecision::Retry)
                .max_retries(2)
                .retry_delay(Duration::from_millis(1)),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_halts_scheduling() {
        let report = for_each(
            items(10),
            item_fn(|item, _| async move {
                if item["n"].as_u64().unwrap() == 2 {
                    Err(Error::ExecutionError("fatal".into()))
                } else {
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default().on_error(ErrorDecision::Stop),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        // Items after the failure were never dispatched.
        assert!(report.completed + report.failed + report.skipped < report.total);
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let captured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        let report = for_each(
            items(1),
            item_fn(|_, _| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }),
            ForEachOptions::default()
                .timeout(Duration::from_millis(10))
                .on_error_fn(move |error, _, _| {
                    *sink.lock() = Some(error.to_string());
                    ErrorDecision::Continue
                }),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();
        assert_eq!(report.failed, 1);
        assert!(captured.lock().as_deref().unwrap_or("").contains("imed out"));
    }

    #[tokio::test]
    async fn test_signal_cancels_between_items() {
        let token = CancellationToken::new();
        let cancel_after = token.clone();
        let report = for_each(
            items(10),
            item_fn(move |_, index| {
                let token = cancel_after.clone();
                async move {
                    if index == 2 {
                        token.cancel();
                    }
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default().signal(token),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();

        assert!(report.cancelled);
        assert!(report.completed <= 3);
    }

    #[tokio::test]
    async fn test_persist_without_actions_api_is_error() {
        let err = for_each(
            items(1),
            item_fn(|_, _| async { Ok(Value::Null) }),
            ForEachOptions::default().persist(),
            None,
            "Item.forEach",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_error_skip_counts_skipped() {
        let report = for_each(
            items(4),
            item_fn(|item, _| async move {
                if item["n"].as_u64().unwrap() % 2 == 0 {
                    Err(Error::ExecutionError("skip me".into()))
                } else {
                    Ok(Value::Null)
                }
            }),
            ForEachOptions::default().on_error(ErrorDecision::Skip),
            None,
            "Item.forEach",
        )
        .await
        .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());
    }
}
