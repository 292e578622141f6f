//! Core domain types and port definitions for the insight pipeline.
//!
//! This crate is the hexagonal center of the workspace: pure domain types,
//! the task/artifact data model, the event union published to streaming
//! clients, the error taxonomy, and the port traits implemented by the
//! adapter crates. It has no infrastructure dependencies.

pub mod domain;
pub mod events;
pub mod header;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    Artifact, ArtifactSummary, ChapterPlan, DocHash, Outline, Priority, ResultRef, SiblingKind,
    SiblingStatus, SourceContent, TaskError, TaskErrorKind, TaskId, TaskPayload, TaskSnapshot,
    TaskStatus, TaskType, canonical_doc_hash_for_file, canonical_doc_hash_for_video,
    extract_video_id, normalize_video_url, sha256_hex,
};
pub use events::{EventEnvelope, TaskEvent};
pub use header::{DocHeader, HeaderError};
pub use ports::{
    AuthVerifier, GenerateRequest, LmClient, LmError, LmErrorKind, PdfError, PdfRenderer,
    ProgressSink, TaskContext, TaskHandler, TtsEngine, TtsError,
};
pub use settings::Settings;
