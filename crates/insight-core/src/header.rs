//! Metadata header codec for stored Markdown artifacts.
//!
//! Each artifact file begins with a fenced block delimited by `---` lines,
//! holding `key: value` pairs, followed by a blank line and the content:
//!
//! ```text
//! ---
//! title_en: Deep Dive into X
//! title_cn: 深入解读X
//! upload_date: 20240101
//! video_url: https://www.youtube.com/watch?v=dQw4w9WgXcQ
//! is_reinvent: true
//! ---
//!
//! # Content...
//! ```
//!
//! Serialization is canonical (fixed key order, only present optional keys)
//! so a parse/serialize cycle reproduces the header byte-for-byte. Legacy
//! records carrying a single `title:` key parse with both titles set to it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header fence delimiter line.
const FENCE: &str = "---";

/// `upload_date` value used for sources with no date.
pub const EPOCH_DATE: &str = "19700101";

/// Content type label for subtitle-sourced artifacts.
pub const CONTENT_TYPE_VIDEO: &str = "YouTube视频";
/// Content type label for PDF-sourced artifacts.
pub const CONTENT_TYPE_PDF: &str = "PDF文档";
/// Content type label for plain document sources.
pub const CONTENT_TYPE_DOCUMENT: &str = "文档";

/// Parsed metadata header of a stored artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocHeader {
    pub title_en: String,
    pub title_cn: String,
    /// `YYYYMMDD`, or [`EPOCH_DATE`] for non-dated sources.
    pub upload_date: String,
    /// Source URL, possibly a synthetic identifier for non-URL sources.
    pub video_url: String,
    pub is_reinvent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Header parse failures.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    /// The file does not start with a `---` fence.
    #[error("missing opening header fence")]
    MissingOpeningFence,
    /// No closing `---` fence was found.
    #[error("missing closing header fence")]
    MissingClosingFence,
    /// A line inside the fence is not a `key: value` pair.
    #[error("malformed header line: {line}")]
    MalformedLine { line: String },
    /// A required key is absent.
    #[error("missing required header key: {key}")]
    MissingKey { key: &'static str },
}

impl DocHeader {
    /// Split a stored file into its header and body.
    ///
    /// The body is everything after the closing fence with a single leading
    /// blank line consumed.
    pub fn parse_document(contents: &str) -> Result<(Self, String), HeaderError> {
        let mut lines = contents.lines();
        if lines.next().map(str::trim_end) != Some(FENCE) {
            return Err(HeaderError::MissingOpeningFence);
        }

        let mut title: Option<String> = None;
        let mut header = Self::default();
        let mut saw_upload_date = false;
        let mut saw_url = false;
        let mut saw_is_reinvent = false;
        let mut closed = false;
        let mut consumed = FENCE.len() + 1;

        for line in lines.by_ref() {
            consumed += line.len() + 1;
            let trimmed = line.trim_end();
            if trimmed == FENCE {
                closed = true;
                break;
            }
            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(HeaderError::MalformedLine {
                    line: trimmed.to_string(),
                });
            };
            let value = value.trim_start();
            match key {
                "title_en" => header.title_en = value.to_string(),
                "title_cn" => header.title_cn = value.to_string(),
                // Legacy single-title records
                "title" => title = Some(value.to_string()),
                "upload_date" => {
                    header.upload_date = value.to_string();
                    saw_upload_date = true;
                }
                "video_url" => {
                    header.video_url = value.to_string();
                    saw_url = true;
                }
                "is_reinvent" => {
                    header.is_reinvent = value == "true";
                    saw_is_reinvent = true;
                }
                "course_code" => header.course_code = Some(value.to_string()),
                "level" => header.level = Some(value.to_string()),
                "content_type" => header.content_type = Some(value.to_string()),
                // Unknown keys are tolerated for forward compatibility
                _ => {}
            }
        }

        if !closed {
            return Err(HeaderError::MissingClosingFence);
        }

        if let Some(title) = title {
            if header.title_en.is_empty() {
                header.title_en.clone_from(&title);
            }
            if header.title_cn.is_empty() {
                header.title_cn = title;
            }
        }
        if header.title_en.is_empty() && header.title_cn.is_empty() {
            return Err(HeaderError::MissingKey { key: "title_en" });
        }
        if !saw_upload_date {
            return Err(HeaderError::MissingKey { key: "upload_date" });
        }
        if !saw_url {
            return Err(HeaderError::MissingKey { key: "video_url" });
        }
        if !saw_is_reinvent {
            return Err(HeaderError::MissingKey { key: "is_reinvent" });
        }

        let rest = contents.get(consumed.min(contents.len())..).unwrap_or("");
        let body = rest.strip_prefix('\n').unwrap_or(rest).to_string();

        Ok((header, body))
    }

    /// Parse just the header, discarding the body.
    pub fn parse(contents: &str) -> Result<Self, HeaderError> {
        Self::parse_document(contents).map(|(header, _)| header)
    }
}

impl fmt::Display for DocHeader {
    /// Canonical serialized form, ending with the closing fence and a
    /// trailing newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{FENCE}")?;
        writeln!(f, "title_en: {}", self.title_en)?;
        writeln!(f, "title_cn: {}", self.title_cn)?;
        writeln!(f, "upload_date: {}", self.upload_date)?;
        writeln!(f, "video_url: {}", self.video_url)?;
        writeln!(f, "is_reinvent: {}", self.is_reinvent)?;
        if let Some(ref code) = self.course_code {
            writeln!(f, "course_code: {code}")?;
        }
        if let Some(ref level) = self.level {
            writeln!(f, "level: {level}")?;
        }
        if let Some(ref ct) = self.content_type {
            writeln!(f, "content_type: {ct}")?;
        }
        writeln!(f, "{FENCE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DocHeader {
        DocHeader {
            title_en: "Scaling Storage".to_string(),
            title_cn: "扩展存储".to_string(),
            upload_date: "20231128".to_string(),
            video_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            is_reinvent: true,
            course_code: Some("STG301".to_string()),
            level: Some("300".to_string()),
            content_type: Some(CONTENT_TYPE_VIDEO.to_string()),
        }
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let serialized = sample().to_string();
        let reparsed = DocHeader::parse(&serialized).unwrap();
        assert_eq!(reparsed.to_string(), serialized);
        assert_eq!(reparsed, sample());
    }

    #[test]
    fn round_trip_without_optional_keys() {
        let header = DocHeader {
            course_code: None,
            level: None,
            content_type: None,
            ..sample()
        };
        let serialized = header.to_string();
        assert!(!serialized.contains("course_code"));
        assert_eq!(DocHeader::parse(&serialized).unwrap().to_string(), serialized);
    }

    #[test]
    fn body_is_split_after_blank_line() {
        let contents = format!("{}\n# Chapter One\n\ntext", sample());
        let (header, body) = DocHeader::parse_document(&contents).unwrap();
        assert_eq!(header, sample());
        assert_eq!(body, "# Chapter One\n\ntext");
    }

    #[test]
    fn legacy_single_title_fills_both() {
        let contents = "---\ntitle: Old Record\nupload_date: 19700101\nvideo_url: upload://abc\nis_reinvent: false\n---\n\nbody";
        let (header, _) = DocHeader::parse_document(contents).unwrap();
        assert_eq!(header.title_en, "Old Record");
        assert_eq!(header.title_cn, "Old Record");
        assert!(!header.is_reinvent);
    }

    #[test]
    fn missing_fences_are_rejected() {
        assert!(matches!(
            DocHeader::parse("no fence"),
            Err(HeaderError::MissingOpeningFence)
        ));
        assert!(matches!(
            DocHeader::parse("---\ntitle_en: x"),
            Err(HeaderError::MissingClosingFence)
        ));
    }

    #[test]
    fn missing_required_keys_are_rejected() {
        let no_date = "---\ntitle_en: x\ntitle_cn: y\nvideo_url: z\nis_reinvent: false\n---\n";
        assert!(matches!(
            DocHeader::parse(no_date),
            Err(HeaderError::MissingKey { key: "upload_date" })
        ));

        let no_reinvent = "---\ntitle_en: x\ntitle_cn: y\nupload_date: 19700101\nvideo_url: z\n---\n";
        assert!(matches!(
            DocHeader::parse(no_reinvent),
            Err(HeaderError::MissingKey { key: "is_reinvent" })
        ));
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let contents =
            "---\ntitle_en: x\ntitle_cn: y\nupload_date: 19700101\nvideo_url: z\nis_reinvent: true\nfuture_key: whatever\n---\n";
        assert!(DocHeader::parse(contents).is_ok());
    }
}
