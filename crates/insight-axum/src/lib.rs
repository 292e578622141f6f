//! Axum adapter: routes, SSE streaming, and the composition root.
//!
//! The core stays transport-free; this crate maps the task/artifact/TTS
//! contracts onto HTTP. Public reads are unauthenticated; mutating routes
//! require a bearer token validated through the [`insight_core::AuthVerifier`]
//! port.

pub mod bootstrap;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

pub use bootstrap::{AppContext, Collaborators, build_context, init_tracing, serve};
pub use state::AppState;
