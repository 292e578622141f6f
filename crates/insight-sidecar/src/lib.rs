//! Derived-artifact pipeline.
//!
//! A filesystem watcher on the artifact root feeds two dedicated small
//! worker pools: one transforms each committed Markdown artifact into a
//! self-contained visual HTML sibling, the other pre-generates chunked TTS
//! audio into a resumable cache.
//!
//! The on-disk sibling is the source of truth: a "processed" registry entry
//! whose output file is missing is purged and the work redone.

mod pipeline;
mod processed;
mod tts;
mod visual;
mod watcher;

pub use pipeline::DerivedPipeline;
pub use processed::ProcessedSet;
pub use tts::{TtsCacheMeta, TtsEvent, TtsService, chunk_text, extract_readable_text};
pub use visual::VisualGenerator;
pub use watcher::{ArtifactWatcher, WatchError, parse_artifact_path};
