//! The generation workflow handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use insight_core::header::{
    CONTENT_TYPE_DOCUMENT, CONTENT_TYPE_PDF, CONTENT_TYPE_VIDEO, EPOCH_DATE,
};
use insight_core::{
    DocHeader, GenerateRequest, LmClient, Outline, ResultRef, Settings, SourceContent,
    TaskContext, TaskError, TaskErrorKind, TaskHandler, TaskPayload, extract_video_id,
    normalize_video_url, sha256_hex,
};
use insight_store::{ArtifactStore, CanonicalSource};

use crate::prompts;
use crate::retry::{RetryError, RetryPolicy, with_retry};

/// Workflow tuning, resolved from [`Settings`].
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Phase-C bound on concurrent chapter generations.
    pub chapter_subconcurrency: usize,
    /// Transient-failure retry policy for chapters and the conclusion.
    pub retry: RetryPolicy,
    /// Model identifier passed through to the LM adapter.
    pub preferred_model: Option<String>,
}

impl WorkflowConfig {
    /// Pull the relevant knobs out of the resolved settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chapter_subconcurrency: settings.chapter_subconcurrency.max(1),
            retry: RetryPolicy {
                max_attempts: settings.chapter_retry_max.max(1),
                initial: settings.backoff_initial(),
                max: settings.backoff_max(),
            },
            preferred_model: settings.preferred_model.clone(),
        }
    }
}

/// Prepared source plus the metadata that will seed the artifact header.
struct PreparedSource {
    source: SourceContent,
    canonical: CanonicalSource,
    title_hint: Option<String>,
    header_seed: DocHeader,
}

/// Multi-phase deep-interpretation workflow over an LM capability.
pub struct GenerationWorkflow {
    lm: Arc<dyn LmClient>,
    store: Arc<ArtifactStore>,
    config: WorkflowConfig,
}

impl GenerationWorkflow {
    #[must_use]
    pub fn new(lm: Arc<dyn LmClient>, store: Arc<ArtifactStore>, config: WorkflowConfig) -> Self {
        Self { lm, store, config }
    }

    /// Phase A: turn the payload into prompt-ready source content and a
    /// header seed.
    async fn prepare(&self, ctx: &TaskContext) -> Result<PreparedSource, TaskError> {
        match &ctx.payload {
            TaskPayload::Subtitle { url, text, title } => {
                let Some(video_id) = extract_video_id(url) else {
                    return Err(TaskError::new(
                        TaskErrorKind::UnsupportedSource,
                        "prepare",
                        format!("no video id in source url: {url}"),
                    ));
                };
                let (course_code, level) = title
                    .as_deref()
                    .map_or((None, None), parse_course_tags);
                Ok(PreparedSource {
                    source: SourceContent::Text { text: text.clone() },
                    canonical: CanonicalSource::Video { video_id },
                    title_hint: title.clone(),
                    header_seed: DocHeader {
                        title_en: title.clone().unwrap_or_default(),
                        title_cn: String::new(),
                        upload_date: EPOCH_DATE.to_string(),
                        video_url: normalize_video_url(url),
                        is_reinvent: title.as_deref().is_some_and(is_reinvent_title),
                        course_code,
                        level,
                        content_type: Some(CONTENT_TYPE_VIDEO.to_string()),
                    },
                })
            }
            TaskPayload::Upload {
                file_ref,
                mime,
                title,
                content_fingerprint,
            } => {
                let content_type = if mime.contains("pdf") {
                    CONTENT_TYPE_PDF
                } else {
                    CONTENT_TYPE_DOCUMENT
                };
                Ok(PreparedSource {
                    source: SourceContent::Multimodal {
                        file_ref: file_ref.clone(),
                        mime: mime.clone(),
                    },
                    canonical: CanonicalSource::File {
                        content_digest_hex: content_fingerprint.clone(),
                        title: title.clone(),
                    },
                    title_hint: Some(title.clone()),
                    header_seed: DocHeader {
                        title_en: title.clone(),
                        title_cn: String::new(),
                        upload_date: EPOCH_DATE.to_string(),
                        video_url: format!("upload://{}", &content_fingerprint[..12.min(content_fingerprint.len())]),
                        is_reinvent: is_reinvent_title(title),
                        course_code: None,
                        level: None,
                        content_type: Some(content_type.to_string()),
                    },
                })
            }
            TaskPayload::Text { body, title } => {
                let digest = sha256_hex(body.as_bytes());
                Ok(PreparedSource {
                    source: SourceContent::Text { text: body.clone() },
                    canonical: CanonicalSource::File {
                        content_digest_hex: digest.clone(),
                        title: title.clone(),
                    },
                    title_hint: Some(title.clone()),
                    header_seed: DocHeader {
                        title_en: title.clone(),
                        title_cn: String::new(),
                        upload_date: EPOCH_DATE.to_string(),
                        video_url: format!("upload://{}", &digest[..12]),
                        is_reinvent: is_reinvent_title(title),
                        course_code: None,
                        level: None,
                        content_type: Some(CONTENT_TYPE_DOCUMENT.to_string()),
                    },
                })
            }
            TaskPayload::Enrich { doc_hash } => {
                let Some(hash) = insight_core::DocHash::parse(doc_hash) else {
                    return Err(TaskError::invalid_input(format!(
                        "malformed doc_hash: {doc_hash}"
                    )));
                };
                let artifact = self.store.get_latest(&hash).await.map_err(|e| {
                    TaskError::new(
                        TaskErrorKind::SourceAcquisitionFailed,
                        "prepare",
                        e.to_string(),
                    )
                })?;
                Ok(PreparedSource {
                    source: SourceContent::Text {
                        text: artifact.body,
                    },
                    canonical: CanonicalSource::Existing(hash),
                    title_hint: Some(artifact.header.title_cn.clone()),
                    header_seed: artifact.header,
                })
            }
        }
    }

    /// Phase B: single structured-output call. Failures are fatal.
    async fn outline(
        &self,
        ctx: &TaskContext,
        prepared: &PreparedSource,
    ) -> Result<Outline, TaskError> {
        let request = GenerateRequest {
            prompt: prompts::outline_prompt(&prepared.source, prepared.title_hint.as_deref()),
            source: Some(prepared.source.clone()),
            model: self.config.preferred_model.clone(),
        };
        let outline = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(TaskError::cancelled("outline")),
            result = self.lm.generate_outline(request) => {
                result.map_err(|e| e.into_task_error("outline", 1))?
            }
        };
        if outline.chapters.is_empty() {
            return Err(TaskError::new(
                TaskErrorKind::LmFatal,
                "outline",
                "outline contained no chapters",
            ));
        }
        Ok(outline)
    }

    /// Phase C: chapters in parallel under bounded sub-concurrency.
    ///
    /// Publication order back to the bus may interleave; the returned list
    /// is sorted by chapter id for deterministic assembly.
    async fn chapters(
        &self,
        ctx: &TaskContext,
        prepared: &PreparedSource,
        outline: &Outline,
    ) -> Result<Vec<(u32, String)>, TaskError> {
        let total = outline.chapters.len();
        let semaphore = Arc::new(Semaphore::new(self.config.chapter_subconcurrency));
        // Child token: one permanent chapter failure aborts its siblings
        // without cancelling the whole task.
        let abort = ctx.cancel.child_token();
        let done = Arc::new(AtomicUsize::new(0));
        let mut set: JoinSet<Result<(u32, String), TaskError>> = JoinSet::new();

        for chapter in outline.chapters.clone() {
            let semaphore = Arc::clone(&semaphore);
            let abort = abort.clone();
            let done = Arc::clone(&done);
            let ctx = ctx.clone();
            let lm = Arc::clone(&self.lm);
            let retry = self.config.retry;
            let model = self.config.preferred_model.clone();
            let prompt = prompts::chapter_prompt(outline, &chapter, &prepared.source);
            let source = prepared.source.clone();

            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TaskError::internal("chapter", "semaphore closed"))?;
                if abort.is_cancelled() {
                    return Err(TaskError::cancelled("chapter"));
                }

                let attempt_request = || GenerateRequest {
                    prompt: prompt.clone(),
                    source: Some(source.clone()),
                    model: model.clone(),
                };
                let outcome = with_retry(retry, &abort, || {
                    let request = attempt_request();
                    let lm = Arc::clone(&lm);
                    async move { lm.generate(request).await }
                })
                .await;

                match outcome {
                    Ok((text, attempts)) => {
                        let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                        let pct = 25 + (50 * finished / total) as u8;
                        ctx.log(&format!(
                            "chapter {} generated ({}/{}, attempts={})",
                            chapter.id, finished, total, attempts
                        ));
                        ctx.progress(pct);
                        Ok((chapter.id, text))
                    }
                    Err(RetryError::Cancelled) => Err(TaskError::cancelled("chapter")),
                    Err(RetryError::Exhausted { error, attempts }) => {
                        Err(error.into_task_error("chapter", attempts))
                    }
                }
            });
        }

        let mut chapters = Vec::with_capacity(total);
        let mut failure: Option<TaskError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(done_chapter)) => chapters.push(done_chapter),
                Ok(Err(error)) => {
                    if failure.is_none() {
                        abort.cancel();
                        failure = Some(error);
                    }
                }
                Err(join_error) => {
                    if failure.is_none() {
                        abort.cancel();
                        failure = Some(TaskError::internal(
                            "chapter",
                            format!("chapter task panicked: {join_error}"),
                        ));
                    }
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(TaskError::cancelled("chapter"));
        }
        if let Some(error) = failure {
            return Err(error);
        }
        chapters.sort_by_key(|(id, _)| *id);
        Ok(chapters)
    }

    /// Phase D: closing section conditioned on the assembled chapters.
    async fn conclusion(
        &self,
        ctx: &TaskContext,
        outline: &Outline,
        chapters_markdown: &str,
    ) -> Result<(String, Option<String>), TaskError> {
        let prompt = prompts::conclusion_prompt(outline, chapters_markdown);
        let model = self.config.preferred_model.clone();
        let lm = Arc::clone(&self.lm);
        let outcome = with_retry(self.config.retry, &ctx.cancel, || {
            let request = GenerateRequest {
                prompt: prompt.clone(),
                source: None,
                model: model.clone(),
            };
            let lm = Arc::clone(&lm);
            async move { lm.generate(request).await }
        })
        .await;

        match outcome {
            Ok((raw, _attempts)) => Ok(prompts::split_conclusion(&raw)),
            Err(RetryError::Cancelled) => Err(TaskError::cancelled("conclusion")),
            Err(RetryError::Exhausted { error, attempts }) => {
                Err(error.into_task_error("conclusion", attempts))
            }
        }
    }

    /// Phase E: deterministic assembly and commit.
    async fn assemble_and_commit(
        &self,
        ctx: &TaskContext,
        prepared: PreparedSource,
        outline: Outline,
        chapters: Vec<(u32, String)>,
        conclusion: String,
        enriched_intro: Option<String>,
    ) -> Result<ResultRef, TaskError> {
        if ctx.cancel.is_cancelled() {
            return Err(TaskError::cancelled("assemble"));
        }

        let mut header = prepared.header_seed;
        if header.title_cn.is_empty() {
            header.title_cn = outline.title_cn.clone();
        }
        if header.title_en.is_empty() {
            header.title_en = prepared
                .title_hint
                .unwrap_or_else(|| outline.title_cn.clone());
        }

        let intro = enriched_intro.unwrap_or(outline.introduction);
        let chapter_bodies: Vec<&str> = chapters.iter().map(|(_, text)| text.as_str()).collect();
        let body = format!(
            "{intro}\n\n{}\n\n{conclusion}\n",
            chapter_bodies.join("\n\n")
        );

        let (doc_hash, version) = self
            .store
            .commit(&prepared.canonical, &header, &body)
            .await
            .map_err(|e| TaskError::persistence("commit", e.to_string()))?;

        ctx.log(&format!("artifact committed: {doc_hash} v{version}"));
        ctx.progress(100);
        Ok(ResultRef {
            doc_hash: doc_hash.to_string(),
            version,
            title_cn: header.title_cn,
        })
    }
}

#[async_trait]
impl TaskHandler for GenerationWorkflow {
    async fn run(&self, ctx: TaskContext) -> Result<ResultRef, TaskError> {
        let prepared = self.prepare(&ctx).await?;
        ctx.progress(10);
        ctx.log("outline start");

        let outline = self.outline(&ctx, &prepared).await?;
        ctx.progress(25);
        ctx.log(&format!("outline ready: {} chapters", outline.chapters.len()));

        let chapters = self.chapters(&ctx, &prepared, &outline).await?;
        let chapters_markdown = chapters
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        ctx.log("conclusion start");
        let (conclusion, enriched_intro) =
            self.conclusion(&ctx, &outline, &chapters_markdown).await?;
        ctx.progress(90);

        self.assemble_and_commit(&ctx, prepared, outline, chapters, conclusion, enriched_intro)
            .await
    }
}

/// Session-code tags like `STG301` in a talk title: 2-5 uppercase letters
/// followed by exactly three digits. The level is the hundreds bucket of
/// the number.
fn parse_course_tags(title: &str) -> (Option<String>, Option<String>) {
    for token in title.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() < 5 || token.len() > 8 {
            continue;
        }
        let (alpha, digits) = token.split_at(token.len() - 3);
        if (2..=5).contains(&alpha.len())
            && alpha.bytes().all(|b| b.is_ascii_uppercase())
            && digits.bytes().all(|b| b.is_ascii_digit())
        {
            let level = format!("{}00", &digits[..1]);
            return (Some(token.to_string()), Some(level));
        }
    }
    (None, None)
}

/// Whether a title marks a re:Invent talk.
fn is_reinvent_title(title: &str) -> bool {
    let lowered = title.to_lowercase();
    lowered.contains("re:invent") || lowered.contains("reinvent")
}
