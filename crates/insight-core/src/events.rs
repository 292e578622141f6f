//! Canonical event union published through the per-task event bus.
//!
//! This module is the single source of truth for events consumed by SSE
//! handlers and polling clients.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "progress", "pct": 25 }
//! ```
//!
//! A `result` or `error` event is terminal for its task's subscription
//! stream; after one, subscribers receive no further events for that task.

use serde::{Deserialize, Serialize};

use crate::domain::{TaskErrorKind, TaskId};

/// Events published for a single task, in causal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// A workflow log line.
    Log { line: String },

    /// Progress percentage, non-decreasing within a run.
    Progress { pct: u8 },

    /// Terminal success carrying the committed artifact reference.
    Result {
        doc_hash: String,
        version: u32,
        title_cn: String,
    },

    /// Terminal failure with the taxonomy kind.
    Error {
        kind: TaskErrorKind,
        message: String,
    },

    /// Liveness signal emitted on idle streams.
    Heartbeat,

    /// The subscriber fell behind its buffer and is being dropped.
    BackpressureDropped,
}

impl TaskEvent {
    /// Get the event name for wire protocols.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "task:log",
            Self::Progress { .. } => "task:progress",
            Self::Result { .. } => "task:result",
            Self::Error { .. } => "task:error",
            Self::Heartbeat => "task:heartbeat",
            Self::BackpressureDropped => "task:backpressure_dropped",
        }
    }

    /// Whether this event ends the task's stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

/// A published event together with its per-task sequence number.
///
/// `event_id` is strictly increasing from 1 within a task; reconnecting
/// clients pass the last id they saw to replay everything after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: u64,
    pub task_id: TaskId,
    pub event: TaskEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_uses_type_tag() {
        let event = TaskEvent::Progress { pct: 25 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"progress","pct":25}"#);

        let event = TaskEvent::Error {
            kind: TaskErrorKind::WorkflowTimeout,
            message: "deadline".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"kind\":\"workflow_timeout\""));
    }

    /// Lock down event names to prevent frontend subscription mismatches.
    #[test]
    fn event_names_are_stable() {
        let cases = vec![
            (
                TaskEvent::Log {
                    line: "x".to_string(),
                },
                "task:log",
            ),
            (TaskEvent::Progress { pct: 1 }, "task:progress"),
            (
                TaskEvent::Result {
                    doc_hash: "abc123def456".to_string(),
                    version: 1,
                    title_cn: "题".to_string(),
                },
                "task:result",
            ),
            (
                TaskEvent::Error {
                    kind: TaskErrorKind::Internal,
                    message: String::new(),
                },
                "task:error",
            ),
            (TaskEvent::Heartbeat, "task:heartbeat"),
            (TaskEvent::BackpressureDropped, "task:backpressure_dropped"),
        ];
        for (event, expected) in cases {
            assert_eq!(event.event_name(), expected);
        }
    }

    #[test]
    fn only_result_and_error_are_terminal() {
        assert!(
            TaskEvent::Result {
                doc_hash: String::new(),
                version: 1,
                title_cn: String::new(),
            }
            .is_terminal()
        );
        assert!(
            TaskEvent::Error {
                kind: TaskErrorKind::Internal,
                message: String::new(),
            }
            .is_terminal()
        );
        assert!(!TaskEvent::Heartbeat.is_terminal());
        assert!(!TaskEvent::Progress { pct: 100 }.is_terminal());
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = EventEnvelope {
            event_id: 7,
            task_id: TaskId::from_string("t-1"),
            event: TaskEvent::Heartbeat,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
