//! Trash subtree bookkeeping.
//!
//! A soft delete moves an artifact's whole directory into
//! `<trash>/<doc_hash>.<unix_millis>/`; the timestamped name keeps repeated
//! delete/restore cycles of the same hash apart.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use insight_core::DocHash;

use crate::store::StoreError;

/// A soft-deleted artifact awaiting restore or purge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrashEntry {
    /// Directory name under the trash root.
    pub name: String,
    pub doc_hash: DocHash,
    pub deleted_at: DateTime<Utc>,
}

/// Trash entry name for a hash deleted at `when`.
pub(crate) fn entry_name(doc_hash: &DocHash, when: DateTime<Utc>) -> String {
    format!("{}.{}", doc_hash, when.timestamp_millis())
}

/// Parse `<doc_hash>.<unix_millis>` back into its parts.
fn parse_entry_name(name: &str) -> Option<(DocHash, DateTime<Utc>)> {
    let (hash_part, millis_part) = name.split_once('.')?;
    let doc_hash = DocHash::parse(hash_part)?;
    let millis: i64 = millis_part.parse().ok()?;
    let deleted_at = Utc.timestamp_millis_opt(millis).single()?;
    Some((doc_hash, deleted_at))
}

/// List trash entries, newest deletion first.
pub(crate) async fn list(trash_root: &Path) -> Result<Vec<TrashEntry>, StoreError> {
    let mut entries = Vec::new();
    let mut dirs = match tokio::fs::read_dir(trash_root).await {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(StoreError::io(trash_root, &e)),
    };
    while let Some(dir_entry) = dirs
        .next_entry()
        .await
        .map_err(|e| StoreError::io(trash_root, &e))?
    {
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if let Some((doc_hash, deleted_at)) = parse_entry_name(&name) {
            entries.push(TrashEntry {
                name,
                doc_hash,
                deleted_at,
            });
        }
    }
    entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
    Ok(entries)
}

/// Resolve a trash entry by name.
pub(crate) async fn find(trash_root: &Path, name: &str) -> Result<TrashEntry, StoreError> {
    let Some((doc_hash, deleted_at)) = parse_entry_name(name) else {
        return Err(StoreError::TrashEntryNotFound {
            name: name.to_string(),
        });
    };
    if tokio::fs::metadata(trash_root.join(name)).await.is_err() {
        return Err(StoreError::TrashEntryNotFound {
            name: name.to_string(),
        });
    }
    Ok(TrashEntry {
        name: name.to_string(),
        doc_hash,
        deleted_at,
    })
}
