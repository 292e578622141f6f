//! Persisted "processed" registry.
//!
//! A JSON file mapping artifact keys (`<doc_hash>/v<version>.md`) to the
//! output they produced. Entries are memoization only: if the recorded
//! output is missing on disk the entry is purged and the caller regenerates.
//! Writes go through the same temp-file-then-rename discipline as artifacts.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One completed piece of derived work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessedEntry {
    /// Path of the produced output file.
    pub output: PathBuf,
}

/// Registry of completed derived work, persisted as JSON.
pub struct ProcessedSet {
    path: PathBuf,
    entries: Mutex<IndexMap<String, ProcessedEntry>>,
}

impl ProcessedSet {
    /// Load the registry, starting empty when the file is missing or
    /// unreadable (a scan will simply redo the work).
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Whether `key` is already done AND its output still exists.
    ///
    /// A stale entry (output missing on disk) is purged and `false` is
    /// returned so the caller regenerates.
    pub fn check(&self, key: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.output.exists() => true,
            Some(entry) => {
                tracing::info!(
                    key,
                    output = %entry.output.display(),
                    "processed entry is stale, regenerating"
                );
                entries.shift_remove(key);
                self.persist(&entries);
                false
            }
            None => false,
        }
    }

    /// Record completed work.
    pub fn mark(&self, key: &str, output: impl Into<PathBuf>) {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            ProcessedEntry {
                output: output.into(),
            },
        );
        self.persist(&entries);
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn persist(&self, entries: &IndexMap<String, ProcessedEntry>) {
        if let Err(e) = write_json_atomic(&self.path, entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist processed set");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, ProcessedEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn write_json_atomic(
    path: &Path,
    entries: &IndexMap<String, ProcessedEntry>,
) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new().prefix(".tmp").tempfile_in(dir)?;
    tmp.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_then_check_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let registry_path = tmp.path().join("visual-processed.json");
        let output = tmp.path().join("v1.html");
        std::fs::write(&output, "<html/>").unwrap();

        let set = ProcessedSet::load(&registry_path);
        assert!(!set.check("abc123def456/v1.md"));
        set.mark("abc123def456/v1.md", &output);
        assert!(set.check("abc123def456/v1.md"));

        // A fresh load reads the persisted file.
        let reloaded = ProcessedSet::load(&registry_path);
        assert!(reloaded.check("abc123def456/v1.md"));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn stale_entry_is_purged_when_output_is_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let registry_path = tmp.path().join("visual-processed.json");
        let output = tmp.path().join("v1.html");
        std::fs::write(&output, "<html/>").unwrap();

        let set = ProcessedSet::load(&registry_path);
        set.mark("key", &output);
        assert!(set.check("key"));

        // The on-disk sibling is the source of truth.
        std::fs::remove_file(&output).unwrap();
        assert!(!set.check("key"));
        assert!(set.is_empty());

        // The purge was persisted too.
        let reloaded = ProcessedSet::load(&registry_path);
        assert!(!reloaded.check("key"));
    }

    #[test]
    fn corrupt_registry_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let registry_path = tmp.path().join("broken.json");
        std::fs::write(&registry_path, "not json at all").unwrap();
        let set = ProcessedSet::load(&registry_path);
        assert!(set.is_empty());
    }
}
