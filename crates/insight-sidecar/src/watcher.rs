//! Debounced filesystem watcher on the artifact root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;

use insight_core::DocHash;

/// Debounce window before coalesced events are delivered.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// Watcher failures.
#[derive(Debug, thiserror::Error)]
#[error("watch error on {}: {message}", .path.display())]
pub struct WatchError {
    pub path: PathBuf,
    pub message: String,
}

/// Watches the artifact root and surfaces changed Markdown artifact paths.
///
/// The debouncer handle is held inside; dropping the watcher stops the
/// stream.
pub struct ArtifactWatcher {
    // Keeps the OS watcher alive for the lifetime of the pipeline.
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
    rx: mpsc::UnboundedReceiver<PathBuf>,
}

impl ArtifactWatcher {
    /// Start watching `root` recursively for created/modified `.md` files.
    pub fn start(root: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for debounced in events {
                        if !matches!(
                            debounced.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_)
                        ) {
                            continue;
                        }
                        for path in &debounced.event.paths {
                            if path.extension().is_some_and(|ext| ext == "md") {
                                let _ = tx.send(path.clone());
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!(error = %e, "artifact watcher error");
                    }
                }
            },
        )
        .map_err(|e| WatchError {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;

        debouncer
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
        tracing::info!(root = %root.display(), "watching artifact root");

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Next changed artifact path; `None` once the watcher has stopped.
    pub async fn recv(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }
}

/// Parse `<root>/<doc_hash>/v<version>.md` back into its identity.
#[must_use]
pub fn parse_artifact_path(root: &Path, path: &Path) -> Option<(DocHash, u32)> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let hash_part = components.next()?.as_os_str().to_string_lossy().into_owned();
    let file_part = components.next()?.as_os_str().to_string_lossy().into_owned();
    if components.next().is_some() {
        return None;
    }
    let doc_hash = DocHash::parse(&hash_part)?;
    let version = file_part
        .strip_prefix('v')?
        .strip_suffix(".md")?
        .parse()
        .ok()?;
    Some((doc_hash, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_parse_back_to_identity() {
        let root = Path::new("/data/artifacts");
        let path = root.join("abc123def456").join("v3.md");
        let (hash, version) = parse_artifact_path(root, &path).unwrap();
        assert_eq!(hash.as_str(), "abc123def456");
        assert_eq!(version, 3);
    }

    #[test]
    fn non_artifact_paths_are_rejected() {
        let root = Path::new("/data/artifacts");
        assert!(parse_artifact_path(root, &root.join("abc123def456").join("v3.html")).is_none());
        assert!(parse_artifact_path(root, &root.join("not-a-hash").join("v1.md")).is_none());
        assert!(parse_artifact_path(root, &root.join("abc123def456").join("deep").join("v1.md")).is_none());
        assert!(parse_artifact_path(root, Path::new("/elsewhere/abc123def456/v1.md")).is_none());
    }

    #[tokio::test]
    async fn watcher_surfaces_new_markdown_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut watcher = ArtifactWatcher::start(tmp.path()).unwrap();

        let dir = tmp.path().join("abc123def456");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("v1.md"), "contents").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), watcher.recv())
            .await
            .expect("watcher delivered nothing")
            .expect("watcher closed");
        assert!(received.ends_with("abc123def456/v1.md"));
    }
}
