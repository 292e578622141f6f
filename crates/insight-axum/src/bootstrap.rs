//! Composition root.
//!
//! Initialization order: config → store → bus → pool → workflow factory →
//! sidecar pipeline → transport. Teardown is the reverse, with the pool
//! draining in-flight tasks up to a deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use insight_core::{
    AuthVerifier, GenerateRequest, LmClient, LmError, Outline, PdfError, PdfRenderer, Settings,
    TaskType, TtsEngine, TtsError,
};
use insight_sidecar::{DerivedPipeline, ProcessedSet, TtsService, VisualGenerator};
use insight_store::ArtifactStore;
use insight_tasks::{TaskDispatcher, TaskRegistry};
use insight_workflow::{GenerationWorkflow, WorkflowConfig};

use crate::routes::build_router;
use crate::state::AppState;

/// Voice used for pre-generated narration.
const DEFAULT_TTS_VOICE: &str = "warm-cn";
/// Narration language.
const DEFAULT_TTS_LANGUAGE: &str = "zh";
/// Drain budget for graceful shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Everything the API handlers need.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<ArtifactStore>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub pipeline: Arc<DerivedPipeline>,
    pub tts: Arc<TtsService>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub auth: Arc<dyn AuthVerifier>,
}

/// External capabilities injected at the composition root.
pub struct Collaborators {
    pub lm: Arc<dyn LmClient>,
    pub tts_engine: Arc<dyn TtsEngine>,
    pub pdf: Arc<dyn PdfRenderer>,
}

impl Collaborators {
    /// Placeholder collaborators for deployments that haven't linked the
    /// vendor adapters yet: every capability call fails cleanly.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            lm: Arc::new(UnconfiguredLm),
            tts_engine: Arc::new(UnconfiguredTts),
            pdf: Arc::new(UnconfiguredPdf),
        }
    }
}

/// Install the global tracing subscriber honoring `LOG_LEVEL` (with
/// `RUST_LOG` taking precedence when set).
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the full application context and start its background machinery.
pub async fn build_context(
    settings: Settings,
    collaborators: Collaborators,
) -> anyhow::Result<AppState> {
    let store = Arc::new(
        ArtifactStore::open(
            settings.artifact_root.clone(),
            settings.trash_root.clone(),
            settings.tts_cache_root.clone(),
        )
        .await?,
    );

    let registry = Arc::new(TaskRegistry::new());
    let mut dispatcher = TaskDispatcher::new(
        Arc::clone(&registry),
        settings.max_concurrent_analysis_tasks,
        settings.analysis_queue_max_size,
        settings.task_timeout(),
    );
    let workflow = Arc::new(GenerationWorkflow::new(
        Arc::clone(&collaborators.lm),
        Arc::clone(&store),
        WorkflowConfig::from_settings(&settings),
    ));
    for task_type in [
        TaskType::Youtube,
        TaskType::Pdf,
        TaskType::Document,
        TaskType::UltraDeep,
    ] {
        let handler: Arc<dyn insight_core::TaskHandler> = Arc::clone(&workflow) as Arc<dyn insight_core::TaskHandler>;
        dispatcher.register_handler(task_type, handler);
    }
    let dispatcher = Arc::new(dispatcher);
    dispatcher.start();

    let tts = Arc::new(TtsService::new(
        Arc::clone(&collaborators.tts_engine),
        Arc::clone(&store),
        DEFAULT_TTS_VOICE,
        DEFAULT_TTS_LANGUAGE,
        settings.tts_max_text_chars,
    ));
    let processed = Arc::new(ProcessedSet::load(
        settings.artifact_root.join(".visual-processed.json"),
    ));
    let visual = Arc::new(VisualGenerator::new(
        Arc::clone(&collaborators.lm),
        Arc::clone(&store),
        processed,
        settings.preferred_model.clone(),
    ));
    let pipeline = Arc::new(DerivedPipeline::new(
        Arc::clone(&store),
        visual,
        Arc::clone(&tts),
    ));
    Arc::clone(&pipeline).start()?;
    {
        // Heal missing siblings from previous runs in the background.
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = pipeline.scan_existing().await {
                tracing::warn!(error = %e, "sidecar cold-start scan failed");
            }
        });
    }

    let auth: Arc<dyn AuthVerifier> = Arc::new(StaticBearer {
        token: settings.auth_bearer_token.clone(),
    });

    Ok(Arc::new(AppContext {
        settings,
        store,
        dispatcher,
        pipeline,
        tts,
        pdf: collaborators.pdf,
        auth,
    }))
}

/// Serve the API until ctrl-c, then drain the pool.
pub async fn serve(state: AppState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "insight server listening");
    axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    state.dispatcher.shutdown(SHUTDOWN_DRAIN).await;
    Ok(())
}

/// Bearer check against the configured token. With no token configured,
/// every mutating request is rejected.
struct StaticBearer {
    token: Option<String>,
}

impl AuthVerifier for StaticBearer {
    fn verify(&self, token: &str) -> bool {
        !token.is_empty() && self.token.as_deref() == Some(token)
    }
}

struct UnconfiguredLm;

#[async_trait]
impl LmClient for UnconfiguredLm {
    async fn generate(&self, _request: GenerateRequest) -> Result<String, LmError> {
        Err(LmError::fatal("LM vendor adapter not configured"))
    }
    async fn generate_outline(&self, _request: GenerateRequest) -> Result<Outline, LmError> {
        Err(LmError::fatal("LM vendor adapter not configured"))
    }
}

struct UnconfiguredTts;

#[async_trait]
impl TtsEngine for UnconfiguredTts {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
        _language: &str,
    ) -> Result<Vec<u8>, TtsError> {
        Err(TtsError::new("TTS engine not configured"))
    }
}

struct UnconfiguredPdf;

#[async_trait]
impl PdfRenderer for UnconfiguredPdf {
    async fn render(&self, _markdown: &str, _title: &str) -> Result<Vec<u8>, PdfError> {
        Err(PdfError::new("PDF renderer not configured"))
    }
}
