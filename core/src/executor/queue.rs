use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

use crate::error::ExecutorError;
use crate::util::lock_unpoisoned;

use super::limiter::AdmissionLimiter;

/// Type-erased unit of work held by the queue.
trait QueuedJob: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    fn cancel(self: Box<Self>);
}

struct Job<F, T> {
    make: F,
    tx: oneshot::Sender<Result<T, ExecutorError>>,
}

impl<F, Fut, T> QueuedJob for Job<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ExecutorError>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Job { make, tx } = *self;
        Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { make().await })
                .catch_unwind()
                .await;
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => Err(ExecutorError::TaskPanicked(panic_message(panic.as_ref()))),
            };
            // The caller may have stopped waiting; that is not our problem.
            let _ = tx.send(result);
        })
    }

    fn cancel(self: Box<Self>) {
        let _ = self.tx.send(Err(ExecutorError::Cancelled));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct QueueItem {
    priority: u32,
    seq: u64,
    added_at: DateTime<Utc>,
    estimated_units: u64,
    job: Box<dyn QueuedJob>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // BinaryHeap pops the greatest item: lowest priority number, then oldest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueueItem>,
    paused: bool,
    next_seq: u64,
}

/// Counters describing the queue right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub peak_active: usize,
    pub dispatched: u64,
    pub paused: bool,
}

struct QueueInner {
    limit: usize,
    slots: Arc<Semaphore>,
    limiter: Arc<AdmissionLimiter>,
    state: Mutex<QueueState>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    dispatched: AtomicU64,
}

impl QueueInner {
    /// One scheduling pass: move as many pending items as there are free slots
    /// into execution, highest priority first.
    fn schedule(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut state = lock_unpoisoned(&self.state);
            while !state.paused && !state.pending.is_empty() {
                let Ok(permit) = self.slots.clone().try_acquire_owned() else {
                    break;
                };
                if let Some(item) = state.pending.pop() {
                    ready.push((item, permit));
                }
            }
        }

        for (item, permit) in ready {
            self.dispatch(item, permit);
        }
    }

    fn dispatch(self: &Arc<Self>, item: QueueItem, permit: OwnedSemaphorePermit) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            priority = item.priority,
            seq = item.seq,
            waited_ms = (Utc::now() - item.added_at).num_milliseconds(),
            active,
            "dispatching queued task"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.limiter.acquire(item.estimated_units).await;
            item.job.run().await;

            inner.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            inner.schedule();
        });
    }
}

/// Priority/FIFO work queue with a hard cap on in-flight items.
///
/// Items run on tokio tasks. A slot is a semaphore permit, so at most `limit`
/// items are ever between dispatch and completion. Every dispatched item
/// passes the [`AdmissionLimiter`] before its body runs.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub fn new(limit: usize, limiter: Arc<AdmissionLimiter>) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(QueueInner {
                limit,
                slots: Arc::new(Semaphore::new(limit)),
                limiter,
                state: Mutex::new(QueueState::default()),
                active: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
                dispatched: AtomicU64::new(0),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn limiter(&self) -> &Arc<AdmissionLimiter> {
        &self.inner.limiter
    }

    /// Register `run` and return a future resolving to its result.
    ///
    /// Registration happens before this returns, not when the future is first
    /// polled, so items enqueued back to back while the queue is paused are
    /// dispatched strictly by `(priority, insertion order)` after `resume`.
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F, Fut, T>(
        &self,
        run: F,
        estimated_units: u64,
        priority: u32,
    ) -> impl Future<Output = Result<T, ExecutorError>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ExecutorError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock_unpoisoned(&self.inner.state);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(QueueItem {
                priority,
                seq,
                added_at: Utc::now(),
                estimated_units,
                job: Box::new(Job { make: run, tx }),
            });
        }
        self.inner.schedule();

        async move {
            rx.await.unwrap_or_else(|_| {
                Err(ExecutorError::Runner(
                    "queue dropped the task before it finished".to_string(),
                ))
            })
        }
    }

    /// Stop dispatching new items. In-flight items keep running.
    pub fn pause(&self) {
        lock_unpoisoned(&self.inner.state).paused = true;
    }

    pub fn resume(&self) {
        lock_unpoisoned(&self.inner.state).paused = false;
        self.inner.schedule();
    }

    pub fn is_paused(&self) -> bool {
        lock_unpoisoned(&self.inner.state).paused
    }

    /// Reject every pending item with [`ExecutorError::Cancelled`]. In-flight
    /// items finish naturally. Returns how many items were cancelled.
    pub fn clear(&self) -> usize {
        let drained: Vec<QueueItem> = {
            let mut state = lock_unpoisoned(&self.inner.state);
            state.pending.drain().collect()
        };
        let count = drained.len();
        for item in drained {
            item.job.cancel();
        }
        if count > 0 {
            tracing::info!(cancelled = count, "cleared pending queue items");
        }
        count
    }

    pub fn stats(&self) -> QueueStats {
        let state = lock_unpoisoned(&self.inner.state);
        QueueStats {
            pending: state.pending.len(),
            active: self.inner.active.load(Ordering::SeqCst),
            peak_active: self.inner.peak_active.load(Ordering::SeqCst),
            dispatched: self.inner.dispatched.load(Ordering::SeqCst),
            paused: state.paused,
        }
    }
}
