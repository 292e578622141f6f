//! Shared application state type.

use std::sync::Arc;

use crate::bootstrap::AppContext;

/// Application state shared across all handlers: an Arc-wrapped
/// [`AppContext`] containing every service the API needs.
pub type AppState = Arc<AppContext>;
