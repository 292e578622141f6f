//! Content-addressed, versioned Markdown artifact store.
//!
//! # Design
//!
//! - The filesystem is the source of truth: the in-memory index is
//!   memoization only, rebuilt by directory scan whenever invalidated
//! - Identity is the 12-hex `doc_hash` derived from the canonical source,
//!   never from the body; re-analysis bumps the version of the same hash
//! - Every write is temp-file-then-atomic-rename; stray temp files are
//!   cleaned at startup
//! - Version allocation is serialized per hash; different hashes commit
//!   concurrently
//!
//! On-disk layout:
//!
//! ```text
//! <root>/<doc_hash>/v<version>.md      # the artifact
//! <root>/<doc_hash>/v<version>.html    # visual sibling
//! <root>/<doc_hash>/v<version>.pdf     # pdf sibling
//! <trash>/<doc_hash>.<unix_millis>/…   # soft-deleted subtree
//! ```

mod index;
mod store;
mod trash;

pub use index::{IndexSnapshot, ListResult};
pub use store::{ArtifactStore, CanonicalSource, DeleteReport, StoreError};
pub use trash::TrashEntry;
