//! Bounded-concurrency, priority-ordered worker pool.
//!
//! # Architecture
//!
//! - **Queue**: the pure [`TaskQueue`] state machine behind a mutex
//! - **Workers**: W loops woken by `Notify`, each pulling one task at a time
//! - **Deadlines**: each body runs under `tokio::time::timeout`; on expiry
//!   the body is signalled through its `CancellationToken` and, after a
//!   small grace window, its spawned task is aborted so the slot is freed
//!
//! Body panics are contained by the spawned-task boundary and reported as
//! failures without killing the worker. Workers log to the task event bus
//! through the outcome handler; the pool itself is silent except for its
//! own lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use insight_core::{Priority, ResultRef, TaskError, TaskId, TaskType};

use crate::queue::{QueueFullError, QueuedTaskInfo, TaskQueue};

/// Grace window given to a deadline-exceeded body before its task is
/// aborted outright.
const ABANDON_GRACE: Duration = Duration::from_secs(2);

/// Poll interval while draining in-flight work during shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Future produced by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<ResultRef, TaskError>> + Send>>;

/// Job body: receives its cancellation token, returns the task result.
pub type JobFn = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

/// Dispatch record accepted by [`WorkerPool::submit`].
pub struct WorkerTask {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    /// Per-task deadline enforced by the pool.
    pub timeout: Duration,
    job: JobFn,
}

impl WorkerTask {
    /// Bundle a job body with its dispatch metadata.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        task_type: TaskType,
        priority: Priority,
        timeout: Duration,
        job: JobFn,
    ) -> Self {
        Self {
            task_id,
            task_type,
            priority,
            timeout,
            job,
        }
    }
}

/// How a dispatched job ended, as observed by the pool.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(ResultRef),
    Failed(TaskError),
    /// The body exceeded its deadline and was abandoned.
    TimedOut,
}

/// Snapshot of pool counters for the stats endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub queued: usize,
    pub in_flight: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub max_workers: usize,
    pub max_queue: usize,
    pub running: bool,
}

type OutcomeHandler = Box<dyn Fn(&TaskId, JobOutcome) + Send + Sync>;

struct PoolInner {
    queue: StdMutex<TaskQueue>,
    active: StdMutex<HashMap<TaskId, CancellationToken>>,
    notify: Notify,
    shutdown: CancellationToken,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    max_workers: usize,
    started: AtomicBool,
    on_outcome: OutcomeHandler,
}

/// Submission failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The bounded queue is at capacity.
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),
    /// The pool is no longer accepting work.
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Bounded-concurrency task dispatcher.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` loops over a queue bounded at
    /// `max_queue`. `on_outcome` observes every finished job.
    #[must_use]
    pub fn new(
        max_workers: usize,
        max_queue: usize,
        on_outcome: impl Fn(&TaskId, JobOutcome) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                queue: StdMutex::new(TaskQueue::new(max_queue)),
                active: StdMutex::new(HashMap::new()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                max_workers,
                started: AtomicBool::new(false),
                on_outcome: Box::new(on_outcome),
            }),
        }
    }

    /// Spawn the worker loops. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for idx in 0..self.inner.max_workers {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                worker_loop(inner, idx).await;
            });
        }
        tracing::info!(workers = self.inner.max_workers, "worker pool started");
    }

    /// Enqueue a task, rejecting synchronously when full or shut down.
    ///
    /// Returns the 1-based dispatch position.
    pub fn submit(&self, task: WorkerTask) -> Result<usize, PoolError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        let position = lock(&self.inner.queue).enqueue(task)?;
        self.inner.notify.notify_one();
        Ok(position)
    }

    /// Remove a still-queued task. Returns the removed record so the caller
    /// can settle its registry entry.
    pub fn remove_queued(&self, task_id: &TaskId) -> Option<WorkerTask> {
        lock(&self.inner.queue).remove(task_id)
    }

    /// Signal cancellation to a running task. Returns `false` if the task
    /// is not currently in flight.
    pub fn cancel_running(&self, task_id: &TaskId) -> bool {
        lock(&self.inner.active)
            .get(task_id)
            .map(CancellationToken::cancel)
            .is_some()
    }

    /// Whether the task is queued or in flight.
    #[must_use]
    pub fn is_known(&self, task_id: &TaskId) -> bool {
        lock(&self.inner.queue).contains(task_id)
            || lock(&self.inner.active).contains_key(task_id)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let queue = lock(&self.inner.queue);
        PoolStats {
            queued: queue.len(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            succeeded: self.inner.succeeded.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            timed_out: self.inner.timed_out.load(Ordering::SeqCst),
            max_workers: self.inner.max_workers,
            max_queue: queue.max_size(),
            running: self.inner.started.load(Ordering::SeqCst)
                && !self.inner.shutdown.is_cancelled(),
        }
    }

    /// Pending entries in dispatch order.
    #[must_use]
    pub fn queued_tasks(&self) -> Vec<QueuedTaskInfo> {
        lock(&self.inner.queue).snapshot()
    }

    /// Stop intake and drain in-flight tasks up to `deadline`; anything
    /// still running afterwards is cancelled. Returns `true` when the drain
    /// completed inside the deadline.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();

        let drained = tokio::time::timeout(deadline, async {
            let mut ticker = tokio::time::interval(DRAIN_POLL);
            loop {
                ticker.tick().await;
                if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            for token in lock(&self.inner.active).values() {
                token.cancel();
            }
            tracing::warn!("shutdown deadline hit; in-flight tasks cancelled");
        }
        drained
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn worker_loop(inner: Arc<PoolInner>, worker_idx: usize) {
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }
        let next = lock(&inner.queue).dequeue();
        match next {
            Some(task) => run_one(&inner, task).await,
            None => {
                tokio::select! {
                    biased;

                    () = inner.shutdown.cancelled() => break,
                    () = inner.notify.notified() => {}
                }
            }
        }
    }
    tracing::debug!(worker = worker_idx, "worker loop exited");
}

async fn run_one(inner: &Arc<PoolInner>, task: WorkerTask) {
    let WorkerTask {
        task_id,
        timeout: deadline,
        job,
        ..
    } = task;

    let token = CancellationToken::new();
    lock(&inner.active).insert(task_id.clone(), token.clone());
    inner.in_flight.fetch_add(1, Ordering::SeqCst);

    let mut handle = tokio::spawn(job(token.clone()));
    let outcome = match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(Ok(result))) => {
            inner.succeeded.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Succeeded(result)
        }
        Ok(Ok(Err(error))) => {
            if error.kind != insight_core::TaskErrorKind::WorkflowCancelled {
                inner.failed.fetch_add(1, Ordering::SeqCst);
            }
            JobOutcome::Failed(error)
        }
        Ok(Err(join_error)) => {
            inner.failed.fetch_add(1, Ordering::SeqCst);
            tracing::error!(task = %task_id, %join_error, "job body panicked");
            JobOutcome::Failed(TaskError::internal(
                "worker",
                format!("job body panicked: {join_error}"),
            ))
        }
        Err(_elapsed) => {
            // Cooperative abort first; abandon the task if it won't yield.
            token.cancel();
            if tokio::time::timeout(ABANDON_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
            inner.timed_out.fetch_add(1, Ordering::SeqCst);
            JobOutcome::TimedOut
        }
    };

    lock(&inner.active).remove(&task_id);
    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    (inner.on_outcome)(&task_id, outcome);
}
