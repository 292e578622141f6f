//! insight server binary.

use insight_axum::bootstrap::{Collaborators, build_context, init_tracing, serve};
use insight_core::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading settings; missing file is fine.
    let _ = dotenvy::dotenv();
    let settings = Settings::from_env();
    init_tracing(&settings);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let state = build_context(settings, Collaborators::unconfigured()).await?;
    serve(state, &addr).await
}
