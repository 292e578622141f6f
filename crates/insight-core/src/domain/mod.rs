//! Domain types for tasks, artifacts, and source material.

mod artifact;
mod source;
mod task;

pub use artifact::{Artifact, ArtifactSummary, DocHash, SiblingKind, SiblingStatus};
pub use source::{
    SourceContent, canonical_doc_hash_for_file, canonical_doc_hash_for_video, extract_video_id,
    normalize_video_url, sha256_hex,
};
pub use task::{
    ChapterPlan, LOG_RING_CAPACITY, Outline, Priority, ResultRef, TaskError, TaskErrorKind,
    TaskId, TaskPayload, TaskSnapshot, TaskStatus, TaskType,
};
