//! Port traits implemented by adapter crates.
//!
//! The generation workflow and the sidecar pipeline talk to the outside
//! world only through these traits: the LM vendor, the TTS engine, the PDF
//! renderer, the auth collaborator, and the task event bus. Adapters live
//! at the edge; everything here is infrastructure-free.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    Outline, ResultRef, SourceContent, TaskError, TaskErrorKind, TaskId, TaskPayload, TaskType,
};

/// Request for a single LM generation call.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Source material: inlined for text sources, referenced for multimodal.
    pub source: Option<SourceContent>,
    /// Model identifier override; the adapter's configured default otherwise.
    pub model: Option<String>,
}

impl GenerateRequest {
    /// Plain prompt with no attached source.
    pub fn prompt_only(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            source: None,
            model: None,
        }
    }

    /// Prompt conditioned on source material.
    pub fn with_source(prompt: impl Into<String>, source: SourceContent) -> Self {
        Self {
            prompt: prompt.into(),
            source: Some(source),
            model: None,
        }
    }
}

/// Classification of LM vendor failures, driving the retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmErrorKind {
    /// Retryable: timeout, 429, 5xx.
    Transient,
    /// Non-retryable: auth, quota exceeded, safety block, invalid request.
    Fatal,
}

/// LM vendor call failure.
#[derive(Clone, Debug, thiserror::Error)]
#[error("lm error ({kind:?}): {message}")]
pub struct LmError {
    pub kind: LmErrorKind,
    pub message: String,
    /// HTTP status code if the vendor surfaced one.
    pub status_code: Option<u16>,
}

impl LmError {
    /// Retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: LmErrorKind::Transient,
            message: message.into(),
            status_code: None,
        }
    }

    /// Non-retryable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: LmErrorKind::Fatal,
            message: message.into(),
            status_code: None,
        }
    }

    /// Attach the vendor's HTTP status.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Whether the retry policy may try again.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, LmErrorKind::Transient)
    }

    /// Map into the task-error taxonomy at a given workflow stage.
    #[must_use]
    pub fn into_task_error(self, stage: &str, attempts: u32) -> TaskError {
        let kind = match self.kind {
            LmErrorKind::Transient => TaskErrorKind::LmTransient,
            LmErrorKind::Fatal => TaskErrorKind::LmFatal,
        };
        TaskError::new(kind, stage, self.message).with_attempts(attempts)
    }
}

/// LM vendor capability: prompt in, text (or structured outline) out.
///
/// Calls are expected to take seconds to minutes; implementations must be
/// cancel-safe (dropping the future aborts the call).
#[async_trait]
pub trait LmClient: Send + Sync {
    /// Free-form generation.
    async fn generate(&self, request: GenerateRequest) -> Result<String, LmError>;

    /// Structured-output generation of a document outline.
    async fn generate_outline(&self, request: GenerateRequest) -> Result<Outline, LmError>;
}

/// TTS synthesis failure.
#[derive(Clone, Debug, thiserror::Error)]
#[error("tts error: {message}")]
pub struct TtsError {
    pub message: String,
    pub retryable: bool,
}

impl TtsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// TTS capability: synthesize one chunk of text into audio bytes.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        language: &str,
    ) -> Result<Vec<u8>, TtsError>;
}

/// PDF rendering failure.
#[derive(Clone, Debug, thiserror::Error)]
#[error("pdf render error: {message}")]
pub struct PdfError {
    pub message: String,
}

impl PdfError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External PDF renderer: Markdown in, PDF bytes out.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, markdown: &str, title: &str) -> Result<Vec<u8>, PdfError>;
}

/// External auth collaborator: validates bearer tokens on mutating routes.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// Sink for workflow-emitted progress and log lines.
///
/// Implemented by the task registry; handlers publish through this so the
/// workflow crate stays independent of the bus implementation.
pub trait ProgressSink: Send + Sync {
    fn log(&self, task_id: &TaskId, line: &str);
    fn progress(&self, task_id: &TaskId, pct: u8);
}

/// No-op sink for tests and detached runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn log(&self, _task_id: &TaskId, _line: &str) {}
    fn progress(&self, _task_id: &TaskId, _pct: u8) {}
}

/// Everything a handler needs to run one task.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub payload: TaskPayload,
    /// Cooperative cancellation signal; observed at every suspension point.
    pub cancel: CancellationToken,
    pub sink: Arc<dyn ProgressSink>,
}

impl TaskContext {
    /// Emit a log line for this task.
    pub fn log(&self, line: impl AsRef<str>) {
        self.sink.log(&self.task_id, line.as_ref());
    }

    /// Emit a progress update for this task.
    pub fn progress(&self, pct: u8) {
        self.sink.progress(&self.task_id, pct);
    }
}

/// Dynamic dispatch seam over task types: the generation workflow is one
/// handler, the sidecar jobs are others.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<ResultRef, TaskError>;
}
