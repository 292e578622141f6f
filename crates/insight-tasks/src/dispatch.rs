//! Submission glue between the registry, the pool, and task handlers.
//!
//! A submission creates the registry entry (status `queued`), wraps the
//! registered handler for the task type into a pool job, and enqueues it.
//! The job transitions the task to `running` when a worker accepts it; the
//! pool's outcome handler settles the terminal state and publishes the
//! terminal event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use insight_core::{
    Priority, ProgressSink, TaskContext, TaskError, TaskHandler, TaskId, TaskPayload, TaskStatus,
    TaskType,
};

use crate::pool::{JobOutcome, PoolError, PoolStats, WorkerPool, WorkerTask};
use crate::queue::QueuedTaskInfo;
use crate::registry::TaskRegistry;

/// Bounded wait for a running task to acknowledge cancellation before the
/// registry force-transitions it.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Queue placement returned with a submission.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueueInfo {
    /// 1-based dispatch position at submission time.
    pub position: usize,
    pub queued: usize,
    pub in_flight: usize,
}

/// Result of a submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A new task was created and enqueued.
    Created {
        task_id: TaskId,
        queue_info: QueueInfo,
    },
    /// The supplied task id is still known; the caller should re-subscribe.
    Reconnected { task_id: TaskId },
}

/// Submission failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The bounded queue rejected the task.
    #[error("queue full: maximum {max_size} pending tasks allowed")]
    QueueFull { max_size: usize },
    /// No handler is registered for this task type.
    #[error("no handler registered for task type {task_type:?}")]
    UnsupportedType { task_type: TaskType },
    /// The pool is shutting down.
    #[error("pool is shutting down")]
    ShuttingDown,
}

/// Result of a cancellation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was still queued and is now cancelled.
    Cancelled,
    /// The running task was signalled; it will settle within the grace
    /// window.
    Signalled,
    /// The task had already reached a terminal state.
    AlreadyTerminal,
    /// Unknown task id.
    NotFound,
}

/// Accepts heterogeneous jobs and routes their outcomes back to the bus.
pub struct TaskDispatcher {
    registry: Arc<TaskRegistry>,
    pool: WorkerPool,
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
    task_timeout: Duration,
}

impl TaskDispatcher {
    /// Build a dispatcher over a fresh pool wired into `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        max_workers: usize,
        max_queue: usize,
        task_timeout: Duration,
    ) -> Self {
        let outcome_registry = Arc::clone(&registry);
        let pool = WorkerPool::new(max_workers, max_queue, move |task_id, outcome| {
            match outcome {
                JobOutcome::Succeeded(result) => outcome_registry.set_result(task_id, result),
                JobOutcome::Failed(error) => outcome_registry.set_error(task_id, error),
                JobOutcome::TimedOut => {
                    outcome_registry.set_error(task_id, TaskError::timeout("pool"));
                }
            }
        });
        Self {
            registry,
            pool,
            handlers: HashMap::new(),
            task_timeout,
        }
    }

    /// Register the handler for a task type; replaces any previous one.
    pub fn register_handler(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type, handler);
    }

    /// Start the worker loops.
    pub fn start(&self) {
        self.pool.start();
    }

    /// The shared registry (for snapshots and subscriptions).
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Pending queue entries in dispatch order.
    #[must_use]
    pub fn queued_tasks(&self) -> Vec<QueuedTaskInfo> {
        self.pool.queued_tasks()
    }

    /// Submit a job, or reconnect to a known task.
    pub fn submit(
        &self,
        task_type: TaskType,
        payload: TaskPayload,
        priority: Priority,
        reconnect: Option<TaskId>,
    ) -> Result<SubmitOutcome, SubmitError> {
        if let Some(existing) = reconnect {
            if self.registry.contains(&existing) {
                return Ok(SubmitOutcome::Reconnected { task_id: existing });
            }
        }

        let handler = self
            .handlers
            .get(&task_type)
            .cloned()
            .ok_or(SubmitError::UnsupportedType { task_type })?;

        let task_id = self
            .registry
            .create_task(task_type, payload.clone(), priority);

        let job_registry = Arc::clone(&self.registry);
        let job_task_id = task_id.clone();
        let worker_task = WorkerTask::new(
            task_id.clone(),
            task_type,
            priority,
            self.task_timeout,
            Box::new(move |cancel| {
                Box::pin(async move {
                    job_registry.update_status(&job_task_id, TaskStatus::Running);
                    let sink: Arc<dyn ProgressSink> = job_registry;
                    let ctx = TaskContext {
                        task_id: job_task_id,
                        task_type,
                        payload,
                        cancel,
                        sink,
                    };
                    handler.run(ctx).await
                })
            }),
        );

        match self.pool.submit(worker_task) {
            Ok(position) => {
                let stats = self.pool.stats();
                tracing::info!(task = %task_id, ?task_type, ?priority, position, "task enqueued");
                Ok(SubmitOutcome::Created {
                    task_id,
                    queue_info: QueueInfo {
                        position,
                        queued: stats.queued,
                        in_flight: stats.in_flight,
                    },
                })
            }
            Err(err) => {
                // The entry never became visible work; drop it again.
                self.registry.remove(&task_id);
                Err(match err {
                    PoolError::QueueFull(e) => SubmitError::QueueFull {
                        max_size: e.max_size,
                    },
                    PoolError::ShuttingDown => SubmitError::ShuttingDown,
                })
            }
        }
    }

    /// Cancel a task: queued tasks settle immediately, running ones are
    /// signalled and force-settled after a bounded grace window.
    pub fn cancel(&self, task_id: &TaskId) -> CancelOutcome {
        let Some(snapshot) = self.registry.snapshot(task_id) else {
            return CancelOutcome::NotFound;
        };
        if snapshot.status.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }

        if self.pool.remove_queued(task_id).is_some() {
            self.registry
                .set_error(task_id, TaskError::cancelled("queue"));
            return CancelOutcome::Cancelled;
        }

        if self.pool.cancel_running(task_id) {
            let registry = Arc::clone(&self.registry);
            let watched = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(CANCEL_GRACE).await;
                let still_live = registry
                    .snapshot(&watched)
                    .is_some_and(|s| !s.status.is_terminal());
                if still_live {
                    tracing::warn!(task = %watched, "cancel grace expired; forcing transition");
                    registry.set_error(&watched, TaskError::cancelled("force"));
                }
            });
            return CancelOutcome::Signalled;
        }

        // Raced with completion between the snapshot and the pool checks.
        CancelOutcome::AlreadyTerminal
    }

    /// Graceful shutdown: stop intake and drain in-flight work.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.pool.shutdown(deadline).await
    }
}
