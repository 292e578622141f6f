//! Source material representation and canonical-source hashing.
//!
//! `doc_hash` is derived from the canonical source descriptor, never from
//! the generated body, so identity is stable across re-analysis:
//!
//! - video sources: first 12 hex chars of SHA-256 of the 11-char video id
//! - file sources: first 12 hex chars of SHA-256 of
//!   `SHA-256(file_bytes) || normalized_title`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::artifact::DocHash;

/// Prepared source content handed to the generation workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceContent {
    /// Cleaned plain text, injected directly into prompts.
    Text { text: String },
    /// Vendor file reference passed by reference into multimodal prompts.
    Multimodal { file_ref: String, mime: String },
}

impl SourceContent {
    /// Rough token estimate used for prompt budgeting (≈ 4 chars/token for
    /// text; a flat allowance for multimodal references).
    #[must_use]
    pub fn approx_tokens(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count().div_ceil(4),
            Self::Multimodal { .. } => 32_000,
        }
    }
}

/// Extract the 11-character video id from a URL or bare id.
///
/// Recognizes `v=` query parameters, `youtu.be/<id>`, `/embed/<id>`,
/// `/shorts/<id>`, and a bare 11-char id.
#[must_use]
pub fn extract_video_id(input: &str) -> Option<String> {
    let candidate = if let Some(idx) = input.find("v=") {
        &input[idx + 2..]
    } else if let Some(idx) = input.find("youtu.be/") {
        &input[idx + 9..]
    } else if let Some(idx) = input.find("/embed/") {
        &input[idx + 7..]
    } else if let Some(idx) = input.find("/shorts/") {
        &input[idx + 8..]
    } else {
        input
    };

    let id: String = candidate
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    (id.len() == 11).then_some(id)
}

/// Normalize a video URL: strip tracking parameters, reduce to the stable
/// watch form when a video id is present.
#[must_use]
pub fn normalize_video_url(url: &str) -> String {
    extract_video_id(url).map_or_else(
        || url.split(['?', '#']).next().unwrap_or(url).to_string(),
        |id| format!("https://www.youtube.com/watch?v={id}"),
    )
}

/// Canonical `doc_hash` for a subtitle/video source.
#[must_use]
pub fn canonical_doc_hash_for_video(video_id: &str) -> DocHash {
    let digest = Sha256::digest(video_id.as_bytes());
    DocHash::from_digest_hex(&hex_encode(&digest))
}

/// Canonical `doc_hash` for a file source: the content digest concatenated
/// with the normalized title, hashed again.
#[must_use]
pub fn canonical_doc_hash_for_file(content_digest_hex: &str, title: &str) -> DocHash {
    let normalized = normalize_title(title);
    let mut hasher = Sha256::new();
    hasher.update(content_digest_hex.as_bytes());
    hasher.update(normalized.as_bytes());
    DocHash::from_digest_hex(&hex_encode(&hasher.finalize()))
}

/// Hex SHA-256 of raw file bytes, for upload fingerprints.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

/// Title normalization: trimmed, lowercased, internal whitespace collapsed.
fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
