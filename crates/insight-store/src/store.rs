//! Artifact store implementation.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use insight_core::{
    Artifact, DocHash, DocHeader, HeaderError, SiblingKind, SiblingStatus,
    canonical_doc_hash_for_file, canonical_doc_hash_for_video, extract_video_id,
};

use crate::index::{IndexSnapshot, ListResult};
use crate::trash::{self, TrashEntry};

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error during file operations.
    #[error("I/O error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    /// No artifact exists for this hash.
    #[error("artifact not found: {doc_hash}")]
    NotFound { doc_hash: String },

    /// The hash exists but not at this version.
    #[error("version {version} not found for {doc_hash}")]
    VersionNotFound { doc_hash: String, version: u32 },

    /// The stored file's metadata header is unreadable.
    #[error("corrupt header in {}: {source}", .path.display())]
    CorruptHeader {
        path: PathBuf,
        #[source]
        source: HeaderError,
    },

    /// No trash entry with this name.
    #[error("trash entry not found: {name}")]
    TrashEntryNotFound { name: String },

    /// The requested sibling has not been generated.
    #[error("sibling {kind:?} not ready for {doc_hash} v{version}")]
    SiblingNotReady {
        doc_hash: String,
        version: u32,
        kind: SiblingKind,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Canonical source descriptor from which `doc_hash` is derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalSource {
    /// Subtitle/video source, keyed by the 11-char video id.
    Video { video_id: String },
    /// Uploaded file, keyed by content digest plus normalized title.
    File {
        content_digest_hex: String,
        title: String,
    },
    /// Re-commit under an identity that already exists (enrichment runs).
    Existing(DocHash),
}

impl CanonicalSource {
    /// Derive the stable document hash for this source.
    #[must_use]
    pub fn doc_hash(&self) -> DocHash {
        match self {
            Self::Video { video_id } => canonical_doc_hash_for_video(video_id),
            Self::File {
                content_digest_hex,
                title,
            } => canonical_doc_hash_for_file(content_digest_hex, title),
            Self::Existing(hash) => hash.clone(),
        }
    }
}

/// Outcome of a soft delete. Trash is forward-only: files that failed to
/// move are reported, never rolled back.
#[derive(Clone, Debug)]
pub struct DeleteReport {
    /// Name of the created trash entry.
    pub trash_entry: String,
    /// Files successfully relocated.
    pub moved: Vec<PathBuf>,
    /// Per-file failures.
    pub errors: Vec<(PathBuf, String)>,
}

impl DeleteReport {
    /// Whether every file made it into the trash.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Content-addressed, versioned artifact store rooted at a directory.
pub struct ArtifactStore {
    root: PathBuf,
    trash_root: PathBuf,
    tts_cache_root: PathBuf,
    /// Memoized list index; `None` after invalidation.
    index: RwLock<Option<Arc<IndexSnapshot>>>,
    /// Bumped on every invalidation so pollers can short-circuit.
    cache_version: AtomicU64,
    /// Per-hash commit serialization, created on first use.
    hash_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactStore {
    /// Open (and create if needed) a store at the given roots, cleaning any
    /// stray temp files left by a previous crash.
    pub async fn open(
        root: impl Into<PathBuf>,
        trash_root: impl Into<PathBuf>,
        tts_cache_root: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        let trash_root = trash_root.into();
        let tts_cache_root = tts_cache_root.into();
        for dir in [&root, &trash_root, &tts_cache_root] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, &e))?;
        }
        clean_stray_temp_files(&root).await;

        Ok(Self {
            root,
            trash_root,
            tts_cache_root,
            index: RwLock::new(None),
            cache_version: AtomicU64::new(1),
            hash_locks: StdMutex::new(HashMap::new()),
        })
    }

    /// The artifact root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The TTS chunk cache root.
    #[must_use]
    pub fn tts_cache_root(&self) -> &Path {
        &self.tts_cache_root
    }

    /// Commit a new artifact version.
    ///
    /// Derives the hash from the canonical source, allocates `max+1` under
    /// the per-hash lock, and writes via temp-file-then-rename. The index
    /// is invalidated only after the rename succeeded.
    pub async fn commit(
        &self,
        source: &CanonicalSource,
        header: &DocHeader,
        body: &str,
    ) -> Result<(DocHash, u32), StoreError> {
        let doc_hash = source.doc_hash();
        let dir = self.root.join(doc_hash.as_str());

        let lock = self.hash_lock(doc_hash.as_str());
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, &e))?;
        let version = max_version_in(&dir).await? + 1;
        let contents = format!("{header}\n{body}");
        write_atomic(&dir, &format!("v{version}.md"), contents.into_bytes()).await?;

        self.invalidate().await;
        tracing::info!(doc_hash = %doc_hash, version, "artifact committed");
        Ok((doc_hash, version))
    }

    /// Load the latest version of an artifact.
    ///
    /// Served by directory scan, so a commit is visible immediately after
    /// its rename regardless of index state.
    pub async fn get_latest(&self, doc_hash: &DocHash) -> Result<Artifact, StoreError> {
        let dir = self.root.join(doc_hash.as_str());
        let version = max_version_in(&dir).await?;
        if version == 0 {
            return Err(StoreError::NotFound {
                doc_hash: doc_hash.to_string(),
            });
        }
        self.get_version(doc_hash, version).await
    }

    /// Load a specific version of an artifact.
    pub async fn get_version(
        &self,
        doc_hash: &DocHash,
        version: u32,
    ) -> Result<Artifact, StoreError> {
        let path = self.artifact_path(doc_hash, version);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::VersionNotFound {
                    doc_hash: doc_hash.to_string(),
                    version,
                });
            }
            Err(e) => return Err(StoreError::io(&path, &e)),
        };
        let (doc_header, body) = DocHeader::parse_document(&contents).map_err(|source| {
            StoreError::CorruptHeader {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Artifact {
            doc_hash: doc_hash.clone(),
            version,
            header: doc_header,
            body,
            created_at: file_created_at(&path).await,
        })
    }

    /// Serve the artifact list from the memoized index, rebuilding it after
    /// an invalidation.
    pub async fn list_all(&self) -> Result<ListResult, StoreError> {
        if let Some(snapshot) = self.index.read().await.as_ref() {
            return Ok(ListResult {
                snapshot: Arc::clone(snapshot),
                cache_version: self.cache_version.load(Ordering::SeqCst),
            });
        }

        let rebuilt = Arc::new(IndexSnapshot::build(&self.root).await?);
        let mut slot = self.index.write().await;
        // Another rebuild may have won the race; atomic replacement either way.
        *slot = Some(Arc::clone(&rebuilt));
        Ok(ListResult {
            snapshot: rebuilt,
            cache_version: self.cache_version.load(Ordering::SeqCst),
        })
    }

    /// Current index cache version, bumped on every invalidation.
    #[must_use]
    pub fn cache_version(&self) -> u64 {
        self.cache_version.load(Ordering::SeqCst)
    }

    /// Invalidate the memoized index (commit, delete/restore, watcher event,
    /// or explicit admin refresh).
    pub async fn invalidate(&self) {
        self.cache_version.fetch_add(1, Ordering::SeqCst);
        *self.index.write().await = None;
    }

    /// Answer "has this external source already been analyzed?".
    ///
    /// Accepts an 11-char video id or any URL containing one.
    pub async fn lookup_by_external_key(
        &self,
        key: &str,
    ) -> Result<Option<(DocHash, String)>, StoreError> {
        let Some(video_id) = extract_video_id(key) else {
            return Ok(None);
        };
        let doc_hash = canonical_doc_hash_for_video(&video_id);
        let list = self.list_all().await?;
        Ok(list
            .snapshot
            .summaries
            .iter()
            .find(|summary| summary.doc_hash == doc_hash)
            .map(|summary| (doc_hash, summary.header.title_cn.clone())))
    }

    /// Soft-delete an artifact: move all versions plus siblings and the TTS
    /// chunk cache into a timestamped trash entry.
    pub async fn delete(&self, doc_hash: &DocHash) -> Result<DeleteReport, StoreError> {
        let dir = self.root.join(doc_hash.as_str());
        if tokio::fs::metadata(&dir).await.is_err() {
            return Err(StoreError::NotFound {
                doc_hash: doc_hash.to_string(),
            });
        }

        let entry_name = trash::entry_name(doc_hash, Utc::now());
        let trash_dir = self.trash_root.join(&entry_name);
        tokio::fs::create_dir_all(&trash_dir)
            .await
            .map_err(|e| StoreError::io(&trash_dir, &e))?;

        let mut report = DeleteReport {
            trash_entry: entry_name,
            moved: Vec::new(),
            errors: Vec::new(),
        };

        move_children(&dir, &trash_dir, &mut report).await;
        // Empty source dir is removed; a leftover just means a partial move.
        let _ = tokio::fs::remove_dir(&dir).await;

        // TTS chunk cache follows its parent.
        let tts_dir = self.tts_cache_root.join(doc_hash.as_str());
        if tokio::fs::metadata(&tts_dir).await.is_ok() {
            let target = trash_dir.join("tts-cache");
            match tokio::fs::rename(&tts_dir, &target).await {
                Ok(()) => report.moved.push(target),
                Err(e) => report.errors.push((tts_dir, e.to_string())),
            }
        }

        self.invalidate().await;
        if !report.is_complete() {
            tracing::warn!(
                doc_hash = %doc_hash,
                errors = report.errors.len(),
                "partial trash move"
            );
        }
        Ok(report)
    }

    /// List trash entries, newest first.
    pub async fn list_trash(&self) -> Result<Vec<TrashEntry>, StoreError> {
        trash::list(&self.trash_root).await
    }

    /// Restore a trash entry back into the artifact root.
    pub async fn restore(&self, entry_name: &str) -> Result<DocHash, StoreError> {
        let entry = trash::find(&self.trash_root, entry_name).await?;
        let trash_dir = self.trash_root.join(&entry.name);
        let dir = self.root.join(entry.doc_hash.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, &e))?;

        let mut report = DeleteReport {
            trash_entry: entry.name.clone(),
            moved: Vec::new(),
            errors: Vec::new(),
        };
        // The TTS cache subtree goes back to its own root.
        let tts_backup = trash_dir.join("tts-cache");
        if tokio::fs::metadata(&tts_backup).await.is_ok() {
            let target = self.tts_cache_root.join(entry.doc_hash.as_str());
            if let Err(e) = tokio::fs::rename(&tts_backup, &target).await {
                report.errors.push((tts_backup, e.to_string()));
            }
        }
        move_children(&trash_dir, &dir, &mut report).await;
        let _ = tokio::fs::remove_dir(&trash_dir).await;

        self.invalidate().await;
        Ok(entry.doc_hash)
    }

    /// Permanently delete a trash entry.
    pub async fn purge(&self, entry_name: &str) -> Result<(), StoreError> {
        let entry = trash::find(&self.trash_root, entry_name).await?;
        let trash_dir = self.trash_root.join(&entry.name);
        tokio::fs::remove_dir_all(&trash_dir)
            .await
            .map_err(|e| StoreError::io(&trash_dir, &e))
    }

    /// Path of the stored Markdown for a version.
    #[must_use]
    pub fn artifact_path(&self, doc_hash: &DocHash, version: u32) -> PathBuf {
        self.root
            .join(doc_hash.as_str())
            .join(format!("v{version}.md"))
    }

    /// Path where a derived sibling lives next to its parent.
    #[must_use]
    pub fn sibling_path(&self, doc_hash: &DocHash, version: u32, kind: SiblingKind) -> PathBuf {
        self.root
            .join(doc_hash.as_str())
            .join(format!("v{version}.{}", kind.extension()))
    }

    /// Sibling lifecycle as observable from disk: the file either exists
    /// (`Ready`) or it doesn't (`Absent`). In-flight states are tracked by
    /// the sidecar registries.
    pub async fn sibling_status(
        &self,
        doc_hash: &DocHash,
        version: u32,
        kind: SiblingKind,
    ) -> SiblingStatus {
        let path = self.sibling_path(doc_hash, version, kind);
        if tokio::fs::metadata(&path).await.is_ok() {
            SiblingStatus::Ready
        } else {
            SiblingStatus::Absent
        }
    }

    /// Write a sibling file atomically next to its parent.
    pub async fn write_sibling(
        &self,
        doc_hash: &DocHash,
        version: u32,
        kind: SiblingKind,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(doc_hash.as_str());
        if tokio::fs::metadata(&dir).await.is_err() {
            return Err(StoreError::NotFound {
                doc_hash: doc_hash.to_string(),
            });
        }
        let filename = format!("v{version}.{}", kind.extension());
        write_atomic(&dir, &filename, bytes).await?;
        Ok(dir.join(filename))
    }

    /// Read a ready sibling's bytes.
    pub async fn read_sibling(
        &self,
        doc_hash: &DocHash,
        version: u32,
        kind: SiblingKind,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.sibling_path(doc_hash, version, kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::SiblingNotReady {
                doc_hash: doc_hash.to_string(),
                version,
                kind,
            }),
            Err(e) => Err(StoreError::io(&path, &e)),
        }
    }

    fn hash_lock(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut map = match self.hash_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            map.entry(hash.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Highest `v<N>.md` in a directory, 0 when none (or the dir is absent).
async fn max_version_in(dir: &Path) -> Result<u32, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(dir, &e)),
    };
    let mut max = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, &e))?
    {
        if let Some(version) = parse_markdown_version(&entry.file_name().to_string_lossy()) {
            max = max.max(version);
        }
    }
    Ok(max)
}

/// Parse `v<N>.md` into `N`.
pub(crate) fn parse_markdown_version(name: &str) -> Option<u32> {
    name.strip_prefix('v')?.strip_suffix(".md")?.parse().ok()
}

/// Write bytes via a named temp file in the target directory plus an atomic
/// rename into place.
async fn write_atomic(dir: &Path, filename: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
    let dir = dir.to_path_buf();
    let target = dir.join(filename);
    let target_for_err = target.clone();
    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| StoreError::io(&dir, &e))?;
        tmp.write_all(&bytes)
            .map_err(|e| StoreError::io(tmp.path(), &e))?;
        tmp.flush().map_err(|e| StoreError::io(tmp.path(), &e))?;
        tmp.persist(&target).map_err(|e| StoreError::Io {
            path: target.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io {
        path: target_for_err,
        message: format!("write task failed: {e}"),
    })?
}

/// Remove `.tmp*` files left behind by interrupted writes.
async fn clean_stray_temp_files(root: &Path) {
    let Ok(mut dirs) = tokio::fs::read_dir(root).await else {
        return;
    };
    while let Ok(Some(dir_entry)) = dirs.next_entry().await {
        let Ok(mut files) = tokio::fs::read_dir(dir_entry.path()).await else {
            continue;
        };
        while let Ok(Some(file)) = files.next_entry().await {
            if file.file_name().to_string_lossy().starts_with(".tmp") {
                tracing::debug!(path = %file.path().display(), "removing stray temp file");
                let _ = tokio::fs::remove_file(file.path()).await;
            }
        }
    }
}

/// Move every child of `from` into `to`, recording successes and failures.
async fn move_children(from: &Path, to: &Path, report: &mut DeleteReport) {
    let mut entries = match tokio::fs::read_dir(from).await {
        Ok(entries) => entries,
        Err(e) => {
            report.errors.push((from.to_path_buf(), e.to_string()));
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let source = entry.path();
        let target = to.join(entry.file_name());
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => report.moved.push(target),
            Err(e) => report.errors.push((source, e.to_string())),
        }
    }
}

/// Best-effort creation time (modification time of the stored file).
async fn file_created_at(path: &Path) -> DateTime<Utc> {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified.into(),
        Err(_) => Utc::now(),
    }
}
