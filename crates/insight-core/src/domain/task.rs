//! Task data model: identifiers, priorities, the status state machine, and
//! the structured error taxonomy.
//!
//! These are "UI safe" types - Clone + Debug + Serialize + Deserialize with
//! no infrastructure dependencies. They're used for transmitting task state
//! to frontends via SSE or plain JSON snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Number of log lines retained per task for reconnect catch-up.
pub const LOG_RING_CAPACITY: usize = 200;

/// Opaque unique task identifier, assigned at submission.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh task id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id (e.g. from a reconnect request).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of work a task performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Subtitle-sourced analysis of a video.
    Youtube,
    /// Multimodal analysis of an uploaded PDF.
    Pdf,
    /// Analysis of an uploaded text/Markdown/DOCX document.
    Document,
    /// Re-analysis of an existing artifact at greater depth.
    UltraDeep,
    /// Visual HTML sibling generation (sidecar pool).
    Visual,
    /// TTS audio pre-generation (sidecar pool).
    TtsPregen,
}

impl TaskType {
    /// Stable wire name for the task type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Pdf => "pdf",
            Self::Document => "document",
            Self::UltraDeep => "ultra_deep",
            Self::Visual => "visual",
            Self::TtsPregen => "tts_pregen",
        }
    }
}

/// Scheduling priority, ordered `Low < Normal < High < Urgent`.
///
/// The worker pool serves higher priorities first; `Low` may starve while
/// higher-priority work keeps arriving.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Numeric level as exposed at the API edge (0..=3).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    /// Parse a numeric level from the API edge.
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Low),
            1 => Some(Self::Normal),
            2 => Some(Self::High),
            3 => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Task lifecycle state machine.
///
/// `Queued → Running → (Succeeded | Failed | Cancelled | Timeout)`, with the
/// extra edge `Queued → Cancelled` for tasks cancelled before a worker
/// accepts them. Terminal states are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Whether the transition `self → next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Failure classification attached to a failed task.
///
/// Kinds, not types: the streaming channel and the snapshot carry the kind
/// so clients can react without parsing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    InvalidInput,
    UnsupportedSource,
    SourceAcquisitionFailed,
    /// Retryable vendor error (timeout, 429, 5xx).
    LmTransient,
    /// Non-retryable vendor error (auth, quota, safety block).
    LmFatal,
    WorkflowCancelled,
    WorkflowTimeout,
    PersistenceFailed,
    QueueFull,
    Internal,
}

/// Structured task failure: taxonomy kind plus human-readable context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} at {stage}: {message}")]
pub struct TaskError {
    /// Taxonomy kind.
    pub kind: TaskErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Workflow stage where the failure surfaced (e.g. "outline").
    pub stage: String,
    /// Number of attempts made before giving up.
    pub attempt_count: u32,
}

impl TaskError {
    /// Build an error for a given kind and stage.
    pub fn new(kind: TaskErrorKind, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: stage.into(),
            attempt_count: 1,
        }
    }

    /// Record how many attempts were made.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    /// Cancellation marker error.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::WorkflowCancelled, stage, "task was cancelled")
    }

    /// Deadline-exceeded marker error.
    pub fn timeout(stage: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::WorkflowTimeout, stage, "task deadline exceeded")
    }

    /// Invalid client input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::InvalidInput, "submit", message)
    }

    /// Artifact persistence failure.
    pub fn persistence(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::PersistenceFailed, stage, message)
    }

    /// Unclassified internal failure.
    pub fn internal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Internal, stage, message)
    }
}

/// Typed per-task-type payload carried from submission into the handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Subtitle-sourced job: normalized source URL plus the cleaned text.
    Subtitle {
        url: String,
        text: String,
        title: Option<String>,
    },
    /// Uploaded file job: vendor file reference plus title.
    Upload {
        file_ref: String,
        mime: String,
        title: String,
        /// Hex SHA-256 of the uploaded bytes, for hash derivation.
        content_fingerprint: String,
    },
    /// Plain text job (text/Markdown body submitted inline).
    Text { body: String, title: String },
    /// Enrichment of an existing artifact.
    Enrich { doc_hash: String },
}

/// Committed artifact reference set on a succeeded task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRef {
    pub doc_hash: String,
    pub version: u32,
    pub title_cn: String,
}

/// Point-in-time view of a task for polling clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Progress percentage, monotonically non-decreasing within a run.
    pub progress_pct: u8,
    /// Bounded ring of recent log lines (newest last).
    pub logs: VecDeque<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub payload: TaskPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskSnapshot {
    /// Create a freshly queued snapshot.
    #[must_use]
    pub fn queued(
        task_id: TaskId,
        task_type: TaskType,
        priority: Priority,
        payload: TaskPayload,
    ) -> Self {
        Self {
            task_id,
            task_type,
            priority,
            status: TaskStatus::Queued,
            progress_pct: 0,
            logs: VecDeque::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            payload,
            result_ref: None,
            error: None,
        }
    }

    /// Append a log line, evicting the oldest beyond the ring capacity.
    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.logs.len() == LOG_RING_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(line.into());
    }
}

/// Outline returned by the structured-output phase of the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub title_cn: String,
    /// Introductory paragraph preceding the chapters.
    pub introduction: String,
    pub chapters: Vec<ChapterPlan>,
}

/// A single planned chapter within an outline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterPlan {
    /// 1-based chapter id; final assembly orders by this.
    pub id: u32,
    pub title: String,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_levels() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        for level in 0..=3 {
            assert_eq!(Priority::from_level(level).unwrap().level(), level);
        }
        assert!(Priority::from_level(4).is_none());
    }

    #[test]
    fn status_transitions_follow_the_state_machine() {
        use TaskStatus::{Cancelled, Failed, Queued, Running, Succeeded, Timeout};

        assert!(Queued.can_transition_to(Running));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Succeeded));

        for terminal in [Succeeded, Failed, Cancelled, Timeout] {
            assert!(Running.can_transition_to(terminal));
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Running));
            assert!(!terminal.can_transition_to(Queued));
        }
    }

    #[test]
    fn log_ring_is_bounded() {
        let mut snapshot = TaskSnapshot::queued(
            TaskId::generate(),
            TaskType::Document,
            Priority::Normal,
            TaskPayload::Text {
                body: String::new(),
                title: "t".to_string(),
            },
        );
        for i in 0..(LOG_RING_CAPACITY + 10) {
            snapshot.push_log(format!("line {i}"));
        }
        assert_eq!(snapshot.logs.len(), LOG_RING_CAPACITY);
        assert_eq!(snapshot.logs.front().unwrap(), "line 10");
        assert_eq!(
            snapshot.logs.back().unwrap(),
            &format!("line {}", LOG_RING_CAPACITY + 9)
        );
    }

    #[test]
    fn error_serializes_with_snake_case_kind() {
        let err = TaskError::new(TaskErrorKind::LmTransient, "chapter", "rate limited")
            .with_attempts(3);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"lm_transient\""));
        assert!(json.contains("\"attempt_count\":3"));
    }

    #[test]
    fn task_type_wire_names_are_stable() {
        assert_eq!(TaskType::Youtube.as_str(), "youtube");
        assert_eq!(TaskType::UltraDeep.as_str(), "ultra_deep");
        assert_eq!(TaskType::TtsPregen.as_str(), "tts_pregen");
        let json = serde_json::to_string(&TaskType::UltraDeep).unwrap();
        assert_eq!(json, "\"ultra_deep\"");
    }
}
