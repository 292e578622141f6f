//! Watcher-driven scheduling of derived-artifact work.
//!
//! Each newly appeared or changed Markdown artifact fans out onto two
//! dedicated single-worker pools: visual HTML and TTS pre-generation. The
//! pools reuse the same bounded-queue worker machinery as the analysis
//! pool, just sized down.

use std::sync::Arc;
use std::time::Duration;

use insight_core::{DocHash, Priority, ResultRef, TaskId, TaskType};
use insight_store::ArtifactStore;
use insight_tasks::{JobOutcome, PoolStats, WorkerPool, WorkerTask};

use crate::tts::TtsService;
use crate::visual::VisualGenerator;
use crate::watcher::{ArtifactWatcher, parse_artifact_path};

/// Queue bound for each sidecar pool.
const SIDECAR_QUEUE: usize = 64;

/// Per-job deadline on sidecar work.
const SIDECAR_TIMEOUT: Duration = Duration::from_secs(600);

/// Derived-artifact pipeline: one watcher, two small pools.
pub struct DerivedPipeline {
    store: Arc<ArtifactStore>,
    visual: Arc<VisualGenerator>,
    tts: Arc<TtsService>,
    visual_pool: WorkerPool,
    tts_pool: WorkerPool,
}

impl DerivedPipeline {
    #[must_use]
    pub fn new(
        store: Arc<ArtifactStore>,
        visual: Arc<VisualGenerator>,
        tts: Arc<TtsService>,
    ) -> Self {
        Self {
            store,
            visual,
            tts,
            visual_pool: sidecar_pool("visual"),
            tts_pool: sidecar_pool("tts"),
        }
    }

    /// Start the pools and the watcher loop.
    ///
    /// The watcher task runs until every clone of the pipeline is dropped
    /// and the channel closes.
    pub fn start(self: Arc<Self>) -> Result<(), crate::watcher::WatchError> {
        self.visual_pool.start();
        self.tts_pool.start();

        let mut watcher = ArtifactWatcher::start(self.store.root())?;
        let pipeline = self;
        tokio::spawn(async move {
            while let Some(path) = watcher.recv().await {
                let Some((doc_hash, version)) =
                    parse_artifact_path(pipeline.store.root(), &path)
                else {
                    continue;
                };
                tracing::debug!(doc_hash = %doc_hash, version, "artifact change observed");
                // Keep the list index honest about external writes.
                pipeline.store.invalidate().await;
                pipeline.schedule(&doc_hash, version);
            }
            tracing::info!("artifact watcher stopped");
        });
        Ok(())
    }

    /// Enqueue both follow-ons for one artifact version.
    pub fn schedule(&self, doc_hash: &DocHash, version: u32) {
        self.schedule_visual(doc_hash, version);
        self.schedule_tts(doc_hash);
    }

    /// Enqueue visual HTML generation (skips if already processed).
    pub fn schedule_visual(&self, doc_hash: &DocHash, version: u32) {
        if !self.visual.needs_generation(doc_hash, version) {
            return;
        }
        let visual = Arc::clone(&self.visual);
        let hash = doc_hash.clone();
        let submitted = self.visual_pool.submit(WorkerTask::new(
            TaskId::generate(),
            TaskType::Visual,
            Priority::Normal,
            SIDECAR_TIMEOUT,
            Box::new(move |_cancel| {
                Box::pin(async move {
                    visual.generate(&hash, version).await?;
                    Ok(sidecar_result(&hash, version))
                })
            }),
        ));
        if let Err(e) = submitted {
            tracing::warn!(doc_hash = %doc_hash, error = %e, "visual pool rejected job");
        }
    }

    /// Enqueue TTS pre-generation for the latest version.
    pub fn schedule_tts(&self, doc_hash: &DocHash) {
        let tts = Arc::clone(&self.tts);
        let hash = doc_hash.clone();
        let submitted = self.tts_pool.submit(WorkerTask::new(
            TaskId::generate(),
            TaskType::TtsPregen,
            Priority::Normal,
            SIDECAR_TIMEOUT,
            Box::new(move |_cancel| {
                Box::pin(async move {
                    tts.pregenerate(&hash).await?;
                    Ok(sidecar_result(&hash, 0))
                })
            }),
        ));
        if let Err(e) = submitted {
            tracing::warn!(doc_hash = %doc_hash, error = %e, "tts pool rejected job");
        }
    }

    /// Visual pool counters.
    #[must_use]
    pub fn visual_stats(&self) -> PoolStats {
        self.visual_pool.stats()
    }

    /// TTS pool counters.
    #[must_use]
    pub fn tts_stats(&self) -> PoolStats {
        self.tts_pool.stats()
    }

    /// Cold-start healing: schedule follow-ons for every artifact whose
    /// siblings are missing or whose registry entries went stale.
    pub async fn scan_existing(&self) -> Result<usize, insight_store::StoreError> {
        let list = self.store.list_all().await?;
        let mut scheduled = 0;
        for summary in &list.snapshot.summaries {
            if self.visual.needs_generation(&summary.doc_hash, summary.version) {
                self.schedule_visual(&summary.doc_hash, summary.version);
                scheduled += 1;
            }
        }
        tracing::info!(scheduled, "sidecar cold-start scan complete");
        Ok(scheduled)
    }
}

/// Sidecar pools are invisible to the task registry; outcomes are logged.
fn sidecar_pool(label: &'static str) -> WorkerPool {
    WorkerPool::new(1, SIDECAR_QUEUE, move |task_id, outcome| match outcome {
        JobOutcome::Succeeded(_) => {
            tracing::debug!(pool = label, task = %task_id, "sidecar job done");
        }
        JobOutcome::Failed(error) => {
            tracing::warn!(pool = label, task = %task_id, error = %error, "sidecar job failed");
        }
        JobOutcome::TimedOut => {
            tracing::warn!(pool = label, task = %task_id, "sidecar job timed out");
        }
    })
}

/// Sidecar jobs have no artifact of their own; the result points at the
/// parent (version 0 for TTS, which always tracks the latest).
fn sidecar_result(doc_hash: &DocHash, version: u32) -> ResultRef {
    ResultRef {
        doc_hash: doc_hash.to_string(),
        version,
        title_cn: String::new(),
    }
}
