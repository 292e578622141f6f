//! Artifact identity and summary types.

use crate::header::DocHeader;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable 12-hex-char identifier for a logical document.
///
/// Derived from the canonical source descriptor, not from the body, so
/// re-analysis of the same source keeps the same identity and bumps the
/// version instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocHash(String);

impl DocHash {
    /// Wrap an already-derived hash string.
    ///
    /// Returns `None` unless the input is exactly 12 lowercase hex chars.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 12 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Construct from a hex digest, truncating to 12 chars.
    ///
    /// Callers derive the digest via the canonical-source helpers in
    /// [`crate::domain::source`].
    #[must_use]
    pub fn from_digest_hex(hex: &str) -> Self {
        Self(hex[..12].to_ascii_lowercase())
    }

    /// The hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished Markdown document at a specific version.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub doc_hash: DocHash,
    /// 1-based, strictly increasing per `doc_hash`.
    pub version: u32,
    /// Parsed metadata header.
    pub header: DocHeader,
    /// Markdown content following the header.
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// The canonical stored form: header block, blank line, body.
    #[must_use]
    pub fn to_file_contents(&self) -> String {
        format!("{}\n{}", self.header, self.body)
    }
}

/// Body-less listing entry served from the memoized store index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub doc_hash: DocHash,
    /// Latest committed version.
    pub version: u32,
    pub header: DocHeader,
    /// Whitespace-delimited word count of the latest body.
    pub word_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Kind of derived sibling file keyed off a parent artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingKind {
    VisualHtml,
    Pdf,
    TtsAudio,
    UltraDeep,
}

impl SiblingKind {
    /// File extension used when the sibling lives next to the parent.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::VisualHtml => "html",
            Self::Pdf => "pdf",
            Self::TtsAudio => "wav",
            Self::UltraDeep => "md",
        }
    }
}

/// Lifecycle of a derived sibling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingStatus {
    #[default]
    Absent,
    Generating,
    Ready,
    Failed,
}
