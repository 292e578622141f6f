//! Task registry and per-task event fan-out.
//!
//! The registry owns every task's snapshot (status, progress, bounded log
//! ring) plus a bounded event ring for reconnect replay and a list of live
//! subscribers. Publishers never block: a subscriber that falls behind its
//! bounded buffer is dropped with a `backpressure_dropped` marker instead
//! of slowing the workflow down.
//!
//! # Ordering
//!
//! Within a task, events are assigned strictly increasing `event_id`s under
//! the registry lock, so every subscriber observes the workflow's causal
//! order. Across tasks no ordering is promised.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc;

use insight_core::{
    EventEnvelope, Priority, ProgressSink, ResultRef, TaskError, TaskErrorKind, TaskEvent, TaskId,
    TaskPayload, TaskSnapshot, TaskStatus, TaskType,
};

/// Events retained per task for reconnect replay.
pub const EVENT_RING_CAPACITY: usize = 256;

/// Bounded buffer per subscriber; overflow drops the subscriber.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Terminal tasks retained before the oldest are evicted.
pub const TASK_RETENTION_MAX: usize = 512;

/// `event_id` used for the out-of-band backpressure marker.
const OUT_OF_BAND_EVENT_ID: u64 = 0;

/// Subscription handed to a streaming client: bounded replay followed by a
/// live receiver.
pub struct Subscription {
    /// Retained events after the requested `since_event_id`, oldest first.
    pub replay: Vec<EventEnvelope>,
    /// Live events; closed once the task's terminal event has been sent.
    pub live: mpsc::Receiver<EventEnvelope>,
}

/// Subscription failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// No task with this id is known to the registry.
    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    next_event_id: u64,
    ring: VecDeque<EventEnvelope>,
    subscribers: Vec<mpsc::Sender<EventEnvelope>>,
    terminal_emitted: bool,
}

impl TaskEntry {
    fn new(snapshot: TaskSnapshot) -> Self {
        Self {
            snapshot,
            next_event_id: 1,
            ring: VecDeque::new(),
            subscribers: Vec::new(),
            terminal_emitted: false,
        }
    }

    /// Assign an id, retain in the ring, and fan out to subscribers.
    fn publish(&mut self, task_id: &TaskId, event: TaskEvent) {
        if self.terminal_emitted {
            tracing::warn!(task = %task_id, "event after terminal suppressed");
            return;
        }
        let terminal = event.is_terminal();
        let envelope = EventEnvelope {
            event_id: self.next_event_id,
            task_id: task_id.clone(),
            event,
        };
        self.next_event_id += 1;

        if self.ring.len() == EVENT_RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(envelope.clone());

        self.subscribers.retain(|tx| {
            match tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Best effort: the marker itself may not fit either.
                    let _ = tx.try_send(EventEnvelope {
                        event_id: OUT_OF_BAND_EVENT_ID,
                        task_id: task_id.clone(),
                        event: TaskEvent::BackpressureDropped,
                    });
                    tracing::debug!(task = %task_id, "slow subscriber dropped");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if terminal {
            self.terminal_emitted = true;
            // Closing the senders ends every live stream after the terminal
            // event has been delivered.
            self.subscribers.clear();
        }
    }
}

struct RegistryInner {
    tasks: HashMap<TaskId, TaskEntry>,
    insertion_order: VecDeque<TaskId>,
}

/// Process-scoped task state and event bus.
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tasks: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Create a task in `queued` state and return its id.
    pub fn create_task(
        &self,
        task_type: TaskType,
        payload: TaskPayload,
        priority: Priority,
    ) -> TaskId {
        let task_id = TaskId::generate();
        self.insert(TaskSnapshot::queued(
            task_id.clone(),
            task_type,
            priority,
            payload,
        ));
        task_id
    }

    fn insert(&self, snapshot: TaskSnapshot) {
        let mut inner = self.lock();
        if inner.tasks.len() >= TASK_RETENTION_MAX {
            evict_oldest_terminal(&mut inner);
        }
        let task_id = snapshot.task_id.clone();
        inner.insertion_order.push_back(task_id.clone());
        inner.tasks.insert(task_id, TaskEntry::new(snapshot));
    }

    /// Whether the registry knows this task.
    #[must_use]
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.lock().tasks.contains_key(task_id)
    }

    /// Drop an entry that never became visible work (queue rejection).
    pub fn remove(&self, task_id: &TaskId) {
        let mut inner = self.lock();
        inner.tasks.remove(task_id);
        inner.insertion_order.retain(|other| other != task_id);
    }

    /// Point-in-time snapshot for polling clients.
    #[must_use]
    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.lock()
            .tasks
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Transition the task's status along a legal edge.
    ///
    /// Returns `false` (and leaves state untouched) for an illegal edge or
    /// an unknown task.
    pub fn update_status(&self, task_id: &TaskId, status: TaskStatus) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return false;
        };
        if !entry.snapshot.status.can_transition_to(status) {
            tracing::warn!(
                task = %task_id,
                from = ?entry.snapshot.status,
                to = ?status,
                "illegal status transition rejected"
            );
            return false;
        }
        entry.snapshot.status = status;
        match status {
            TaskStatus::Running => entry.snapshot.started_at = Some(Utc::now()),
            s if s.is_terminal() => entry.snapshot.completed_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Record a progress update and publish it.
    ///
    /// Progress is clamped monotonic: a value at or below the current one is
    /// ignored so the published sequence never decreases.
    pub fn update_progress(&self, task_id: &TaskId, pct: u8) {
        let pct = pct.min(100);
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        if pct <= entry.snapshot.progress_pct {
            tracing::debug!(task = %task_id, pct, "non-increasing progress ignored");
            return;
        }
        entry.snapshot.progress_pct = pct;
        entry.publish(task_id, TaskEvent::Progress { pct });
    }

    /// Append a log line to the bounded ring and publish it.
    pub fn append_log(&self, task_id: &TaskId, line: &str) {
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        entry.snapshot.push_log(line);
        entry.publish(
            task_id,
            TaskEvent::Log {
                line: line.to_string(),
            },
        );
    }

    /// Mark the task succeeded and publish the terminal `result` event.
    pub fn set_result(&self, task_id: &TaskId, result: ResultRef) {
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        if entry.snapshot.status.can_transition_to(TaskStatus::Succeeded) {
            entry.snapshot.status = TaskStatus::Succeeded;
            entry.snapshot.completed_at = Some(Utc::now());
        }
        entry.snapshot.progress_pct = 100;
        entry.snapshot.result_ref = Some(result.clone());
        entry.publish(
            task_id,
            TaskEvent::Result {
                doc_hash: result.doc_hash,
                version: result.version,
                title_cn: result.title_cn,
            },
        );
    }

    /// Mark the task failed (or cancelled / timed out, per the error kind)
    /// and publish the terminal `error` event.
    pub fn set_error(&self, task_id: &TaskId, error: TaskError) {
        let status = match error.kind {
            TaskErrorKind::WorkflowCancelled => TaskStatus::Cancelled,
            TaskErrorKind::WorkflowTimeout => TaskStatus::Timeout,
            _ => TaskStatus::Failed,
        };
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return;
        };
        if entry.snapshot.status.can_transition_to(status) {
            entry.snapshot.status = status;
            entry.snapshot.completed_at = Some(Utc::now());
        }
        entry.snapshot.error = Some(error.clone());
        entry.publish(
            task_id,
            TaskEvent::Error {
                kind: error.kind,
                message: error.message,
            },
        );
    }

    /// Subscribe to a task's events.
    ///
    /// Returns the retained backlog after `since_event_id` (the whole ring
    /// when `None`) and a live receiver. For a task already terminal the
    /// replay ends with the terminal event and the receiver is closed.
    pub fn subscribe(
        &self,
        task_id: &TaskId,
        since_event_id: Option<u64>,
    ) -> Result<Subscription, SubscribeError> {
        let mut inner = self.lock();
        let Some(entry) = inner.tasks.get_mut(task_id) else {
            return Err(SubscribeError::UnknownTask {
                task_id: task_id.to_string(),
            });
        };
        let since = since_event_id.unwrap_or(0);
        let replay: Vec<EventEnvelope> = entry
            .ring
            .iter()
            .filter(|envelope| envelope.event_id > since)
            .cloned()
            .collect();

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if !entry.terminal_emitted {
            entry.subscribers.push(tx);
        }
        // When terminal: tx drops here, closing rx after the replay.
        Ok(Subscription { replay, live: rx })
    }

    /// Number of live subscribers across all tasks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .tasks
            .values()
            .map(|entry| entry.subscribers.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn evict_oldest_terminal(inner: &mut RegistryInner) {
    let victim = inner
        .insertion_order
        .iter()
        .find(|id| {
            inner
                .tasks
                .get(*id)
                .is_some_and(|entry| entry.snapshot.status.is_terminal())
        })
        .cloned();
    if let Some(id) = victim {
        inner.tasks.remove(&id);
        inner.insertion_order.retain(|other| other != &id);
        tracing::debug!(task = %id, "evicted terminal task from registry");
    }
}

impl ProgressSink for TaskRegistry {
    fn log(&self, task_id: &TaskId, line: &str) {
        self.append_log(task_id, line);
    }

    fn progress(&self, task_id: &TaskId, pct: u8) {
        self.update_progress(task_id, pct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_payload() -> TaskPayload {
        TaskPayload::Text {
            body: "Hello, world.\n".to_string(),
            title: "T".to_string(),
        }
    }

    fn make_task(registry: &TaskRegistry) -> TaskId {
        registry.create_task(TaskType::Document, text_payload(), Priority::Normal)
    }

    #[test]
    fn progress_is_monotonic() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        registry.update_progress(&id, 25);
        registry.update_progress(&id, 10);
        registry.update_progress(&id, 30);
        let snapshot = registry.snapshot(&id).unwrap();
        assert_eq!(snapshot.progress_pct, 30);

        let sub = registry.subscribe(&id, None).unwrap();
        let pcts: Vec<u8> = sub
            .replay
            .iter()
            .filter_map(|e| match e.event {
                TaskEvent::Progress { pct } => Some(pct),
                _ => None,
            })
            .collect();
        assert_eq!(pcts, vec![25, 30]);
    }

    #[test]
    fn replay_resumes_after_since_id() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        for i in 1..=5 {
            registry.append_log(&id, &format!("line {i}"));
        }
        let sub = registry.subscribe(&id, Some(3)).unwrap();
        let ids: Vec<u64> = sub.replay.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn terminal_event_closes_subscribers() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        registry.update_status(&id, TaskStatus::Running);
        let mut sub = registry.subscribe(&id, None).unwrap();

        registry.set_result(
            &id,
            ResultRef {
                doc_hash: "abc123def456".to_string(),
                version: 1,
                title_cn: "题".to_string(),
            },
        );

        let event = sub.live.recv().await.unwrap();
        assert!(event.event.is_terminal());
        // Stream is closed after the terminal event.
        assert!(sub.live.recv().await.is_none());

        // Late publishes are suppressed.
        registry.append_log(&id, "should not appear");
        let late = registry.subscribe(&id, None).unwrap();
        assert!(late.replay.iter().all(|e| !matches!(e.event, TaskEvent::Log { ref line } if line == "should not appear")));
    }

    #[test]
    fn late_subscriber_receives_retained_terminal() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        registry.update_status(&id, TaskStatus::Running);
        registry.set_error(&id, TaskError::timeout("pool"));

        let sub = registry.subscribe(&id, None).unwrap();
        let last = sub.replay.last().unwrap();
        assert!(matches!(
            last.event,
            TaskEvent::Error {
                kind: TaskErrorKind::WorkflowTimeout,
                ..
            }
        ));
        assert_eq!(
            registry.snapshot(&id).unwrap().status,
            TaskStatus::Timeout
        );
    }

    #[test]
    fn error_kind_drives_terminal_status() {
        let registry = TaskRegistry::new();

        let id = make_task(&registry);
        registry.update_status(&id, TaskStatus::Running);
        registry.set_error(&id, TaskError::cancelled("chapter"));
        assert_eq!(registry.snapshot(&id).unwrap().status, TaskStatus::Cancelled);

        let id = make_task(&registry);
        registry.update_status(&id, TaskStatus::Running);
        registry.set_error(
            &id,
            TaskError::new(TaskErrorKind::LmFatal, "outline", "auth"),
        );
        assert_eq!(registry.snapshot(&id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        assert!(!registry.update_status(&id, TaskStatus::Succeeded));
        assert!(registry.update_status(&id, TaskStatus::Running));
        assert!(registry.update_status(&id, TaskStatus::Succeeded));
        assert!(!registry.update_status(&id, TaskStatus::Running));
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_with_marker() {
        let registry = TaskRegistry::new();
        let id = make_task(&registry);
        let mut sub = registry.subscribe(&id, None).unwrap();

        // Overflow the bounded buffer without draining.
        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            registry.append_log(&id, &format!("line {i}"));
        }
        assert_eq!(registry.subscriber_count(), 0);

        // Drain: buffered events, no more after the drop.
        let mut received = Vec::new();
        while let Ok(envelope) = sub.live.try_recv() {
            received.push(envelope);
        }
        assert_eq!(received.len(), SUBSCRIBER_BUFFER);
        // The ring still retains everything for reconnect.
        let fresh = registry.subscribe(&id, None).unwrap();
        assert_eq!(fresh.replay.len(), SUBSCRIBER_BUFFER + 10);
    }

    #[test]
    fn eviction_spares_live_tasks() {
        let registry = TaskRegistry::new();
        let first = make_task(&registry);
        registry.update_status(&first, TaskStatus::Running);
        registry.set_error(&first, TaskError::internal("x", "boom"));

        for _ in 0..TASK_RETENTION_MAX {
            make_task(&registry);
        }
        // The terminal task was evicted to make room; live ones remain.
        assert!(registry.snapshot(&first).is_none());
    }
}
