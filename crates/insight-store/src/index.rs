//! Memoized artifact list index.
//!
//! The index is a pure cache over the filesystem: a cold start (or any
//! invalidation) rebuilds it by directory scan, and entries whose backing
//! file has vanished simply don't reappear. No consistency protocol is
//! needed between memory and disk.

use std::path::Path;

use insight_core::{ArtifactSummary, DocHash, DocHeader};

use crate::store::{StoreError, parse_markdown_version};

/// Immutable scan result, shared behind an `Arc` for cheap serving.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    /// Latest-version summaries, newest commit first.
    pub summaries: Vec<ArtifactSummary>,
}

/// A served list plus the cache version it corresponds to.
#[derive(Clone, Debug)]
pub struct ListResult {
    pub snapshot: std::sync::Arc<IndexSnapshot>,
    /// Monotonically increasing; lets pollers short-circuit unchanged lists.
    pub cache_version: u64,
}

impl IndexSnapshot {
    /// Scan the artifact root and build summaries for the latest version of
    /// every hash directory. Unreadable or corrupt entries are skipped with
    /// a warning rather than failing the whole listing.
    pub async fn build(root: &Path) -> Result<Self, StoreError> {
        let mut summaries = Vec::new();
        let mut dirs = match tokio::fs::read_dir(root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StoreError::io(root, &e)),
        };

        while let Some(dir_entry) = dirs
            .next_entry()
            .await
            .map_err(|e| StoreError::io(root, &e))?
        {
            let Some(doc_hash) = DocHash::parse(&dir_entry.file_name().to_string_lossy()) else {
                continue;
            };
            match build_summary(&dir_entry.path(), doc_hash).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %dir_entry.path().display(), error = %e, "skipping unreadable artifact");
                }
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Self { summaries })
    }
}

/// Summary of the latest version inside one hash directory.
async fn build_summary(
    dir: &Path,
    doc_hash: DocHash,
) -> Result<Option<ArtifactSummary>, StoreError> {
    let mut latest = 0u32;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, &e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, &e))?
    {
        if let Some(version) = parse_markdown_version(&entry.file_name().to_string_lossy()) {
            latest = latest.max(version);
        }
    }
    if latest == 0 {
        return Ok(None);
    }

    let path = dir.join(format!("v{latest}.md"));
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| StoreError::io(&path, &e))?;
    let (header, body) = DocHeader::parse_document(&contents).map_err(|source| {
        StoreError::CorruptHeader {
            path: path.clone(),
            source,
        }
    })?;
    let created_at = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified.into(),
        Err(_) => chrono::Utc::now(),
    };

    Ok(Some(ArtifactSummary {
        doc_hash,
        version: latest,
        header,
        word_count: body.split_whitespace().count(),
        created_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_doc(root: &Path, hash: &str, version: u32, title: &str, body: &str) {
        let dir = root.join(hash);
        std::fs::create_dir_all(&dir).unwrap();
        let header = DocHeader {
            title_en: title.to_string(),
            title_cn: title.to_string(),
            upload_date: "19700101".to_string(),
            video_url: "upload://x".to_string(),
            is_reinvent: false,
            ..DocHeader::default()
        };
        std::fs::write(dir.join(format!("v{version}.md")), format!("{header}\n{body}")).unwrap();
    }

    #[tokio::test]
    async fn build_reports_latest_versions_only() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "abc123def456", 1, "Old", "one two");
        write_doc(tmp.path(), "abc123def456", 2, "New", "one two three four");
        write_doc(tmp.path(), "fedcba987654", 1, "Other", "solo");

        let snapshot = IndexSnapshot::build(tmp.path()).await.unwrap();
        assert_eq!(snapshot.summaries.len(), 2);
        let doc = snapshot
            .summaries
            .iter()
            .find(|s| s.doc_hash.as_str() == "abc123def456")
            .unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.header.title_en, "New");
        assert_eq!(doc.word_count, 4);
    }

    #[tokio::test]
    async fn corrupt_entries_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "abc123def456", 1, "Good", "body");
        let bad_dir = tmp.path().join("fedcba987654");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join("v1.md"), "no header here").unwrap();

        let snapshot = IndexSnapshot::build(tmp.path()).await.unwrap();
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.summaries[0].header.title_en, "Good");
    }

    #[tokio::test]
    async fn non_hash_directories_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("not-a-hash")).unwrap();
        let snapshot = IndexSnapshot::build(tmp.path()).await.unwrap();
        assert!(snapshot.summaries.is_empty());
    }

    #[tokio::test]
    async fn missing_root_yields_empty_index() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = IndexSnapshot::build(&tmp.path().join("nope")).await.unwrap();
        assert!(snapshot.summaries.is_empty());
    }
}
