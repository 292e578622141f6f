//! Priority queue state machine for worker dispatch.
//!
//! This is a pure state machine: no I/O, no locking, no tracing. The
//! orchestrator ([`crate::WorkerPool`]) wraps it in a mutex and handles all
//! side effects. Ordering is by descending priority, then FIFO submission
//! order within a priority. Starvation of `Low` under sustained
//! higher-priority load is accepted.

use chrono::{DateTime, Utc};
use insight_core::{Priority, TaskId, TaskType};
use serde::{Deserialize, Serialize};

use crate::pool::WorkerTask;

/// Rejection returned when the bounded queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue full: maximum {max_size} pending tasks allowed")]
pub struct QueueFullError {
    /// Maximum queue capacity.
    pub max_size: usize,
}

/// Queue entry: the dispatch record plus its FIFO sequence number.
struct Entry {
    seq: u64,
    enqueued_at: DateTime<Utc>,
    task: WorkerTask,
}

/// API-facing view of a pending entry (no job closure).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedTaskInfo {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    /// 1-based dispatch position under the current ordering.
    pub position: usize,
    pub enqueued_at: DateTime<Utc>,
}

/// Bounded priority queue of pending worker tasks.
pub struct TaskQueue {
    pending: Vec<Entry>,
    next_seq: u64,
    max_size: usize,
}

impl TaskQueue {
    /// Create a queue with the given bounded capacity.
    #[must_use]
    pub const fn new(max_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
            max_size,
        }
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_size
    }

    /// The bounded capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Enqueue a task, rejecting synchronously when full.
    ///
    /// Returns the 1-based dispatch position under the current ordering.
    pub fn enqueue(&mut self, task: WorkerTask) -> Result<usize, QueueFullError> {
        if self.is_full() {
            return Err(QueueFullError {
                max_size: self.max_size,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let priority = task.priority;
        let entry = Entry {
            seq,
            enqueued_at: Utc::now(),
            task,
        };
        self.pending.push(entry);
        let position = 1 + self
            .pending
            .iter()
            .filter(|other| {
                other.seq != seq
                    && (other.task.priority > priority
                        || (other.task.priority == priority && other.seq < seq))
            })
            .count();
        Ok(position)
    }

    /// Pop the highest-priority, earliest-submitted entry.
    pub fn dequeue(&mut self) -> Option<WorkerTask> {
        let best = self
            .pending
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.task
                    .priority
                    .cmp(&b.task.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(idx, _)| idx)?;
        Some(self.pending.remove(best).task)
    }

    /// Remove a pending entry by task id (queued-task cancellation).
    pub fn remove(&mut self, task_id: &TaskId) -> Option<WorkerTask> {
        let idx = self
            .pending
            .iter()
            .position(|entry| &entry.task.task_id == task_id)?;
        Some(self.pending.remove(idx).task)
    }

    /// Whether a task id is pending.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.pending
            .iter()
            .any(|entry| &entry.task.task_id == task_id)
    }

    /// Snapshot of pending entries in dispatch order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedTaskInfo> {
        let mut order: Vec<&Entry> = self.pending.iter().collect();
        order.sort_by(|a, b| {
            b.task
                .priority
                .cmp(&a.task.priority)
                .then(a.seq.cmp(&b.seq))
        });
        order
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| QueuedTaskInfo {
                task_id: entry.task.task_id.clone(),
                task_type: entry.task.task_type,
                priority: entry.task.priority,
                position: idx + 1,
                enqueued_at: entry.enqueued_at,
            })
            .collect()
    }

}
