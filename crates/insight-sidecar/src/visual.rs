//! Visual HTML sibling generation.
//!
//! One LM call with a fixed template turns a stored Markdown artifact into
//! a self-contained HTML document written next to it. The persisted
//! processed-set prevents duplicate work across restarts.

use std::sync::Arc;

use insight_core::{
    DocHash, GenerateRequest, LmClient, SiblingKind, TaskError, TaskErrorKind,
};
use insight_store::ArtifactStore;

use crate::processed::ProcessedSet;

/// Fixed transform instruction; the artifact Markdown is appended.
const VISUAL_TEMPLATE: &str = "\
你是一位网页设计师。请把下面的 Markdown 文档转换成一个单文件 HTML 页面：\
内联全部 CSS，突出章节结构，适合桌面与移动端阅读，不引用任何外部资源。\
只输出完整的 HTML 文档本身。\n\n<文档>\n";

/// Generates visual HTML siblings for committed artifacts.
pub struct VisualGenerator {
    lm: Arc<dyn LmClient>,
    store: Arc<ArtifactStore>,
    processed: Arc<ProcessedSet>,
    model: Option<String>,
}

impl VisualGenerator {
    #[must_use]
    pub fn new(
        lm: Arc<dyn LmClient>,
        store: Arc<ArtifactStore>,
        processed: Arc<ProcessedSet>,
        model: Option<String>,
    ) -> Self {
        Self {
            lm,
            store,
            processed,
            model,
        }
    }

    /// Registry key for one artifact version.
    #[must_use]
    pub fn key(doc_hash: &DocHash, version: u32) -> String {
        format!("{doc_hash}/v{version}.md")
    }

    /// Whether this version still needs a visual sibling.
    #[must_use]
    pub fn needs_generation(&self, doc_hash: &DocHash, version: u32) -> bool {
        !self.processed.check(&Self::key(doc_hash, version))
    }

    /// Generate (or skip) the visual sibling for one artifact version.
    pub async fn generate(&self, doc_hash: &DocHash, version: u32) -> Result<(), TaskError> {
        let key = Self::key(doc_hash, version);
        if self.processed.check(&key) {
            tracing::debug!(%key, "visual sibling already present");
            return Ok(());
        }

        let artifact = self
            .store
            .get_version(doc_hash, version)
            .await
            .map_err(|e| {
                TaskError::new(TaskErrorKind::SourceAcquisitionFailed, "visual", e.to_string())
            })?;

        let prompt = format!(
            "{VISUAL_TEMPLATE}# {}\n\n{}\n</文档>",
            artifact.header.title_cn, artifact.body
        );
        let raw = self
            .lm
            .generate(GenerateRequest {
                prompt,
                source: None,
                model: self.model.clone(),
            })
            .await
            .map_err(|e| e.into_task_error("visual", 1))?;

        let html = strip_code_fence(&raw);
        let output = self
            .store
            .write_sibling(doc_hash, version, SiblingKind::VisualHtml, html.into_bytes())
            .await
            .map_err(|e| TaskError::persistence("visual", e.to_string()))?;

        self.processed.mark(&key, &output);
        tracing::info!(doc_hash = %doc_hash, version, "visual sibling written");
        Ok(())
    }
}

/// Models often wrap output in a ```html fence; unwrap it.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("html").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use insight_core::{DocHeader, LmError, Outline, SiblingStatus};
    use insight_store::CanonicalSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct HtmlLm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LmClient for HtmlLm {
        async fn generate(&self, _request: GenerateRequest) -> Result<String, LmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("```html\n<html><body>ok</body></html>\n```".to_string())
        }
        async fn generate_outline(&self, _request: GenerateRequest) -> Result<Outline, LmError> {
            Err(LmError::fatal("not used"))
        }
    }

    async fn setup() -> (tempfile::TempDir, Arc<ArtifactStore>, DocHash, u32) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ArtifactStore::open(
                tmp.path().join("artifacts"),
                tmp.path().join("trash"),
                tmp.path().join("tts"),
            )
            .await
            .unwrap(),
        );
        let header = DocHeader {
            title_en: "T".to_string(),
            title_cn: "题".to_string(),
            upload_date: "19700101".to_string(),
            video_url: "upload://x".to_string(),
            is_reinvent: false,
            ..DocHeader::default()
        };
        let (hash, version) = store
            .commit(
                &CanonicalSource::File {
                    content_digest_hex: insight_core::sha256_hex(b"x"),
                    title: "T".to_string(),
                },
                &header,
                "# 正文\n",
            )
            .await
            .unwrap();
        (tmp, store, hash, version)
    }

    #[tokio::test]
    async fn generates_once_and_skips_when_processed() {
        let (tmp, store, hash, version) = setup().await;
        let lm = Arc::new(HtmlLm {
            calls: AtomicU32::new(0),
        });
        let processed = Arc::new(ProcessedSet::load(tmp.path().join("visual.json")));
        let generator = VisualGenerator::new(
            Arc::clone(&lm) as Arc<dyn LmClient>,
            Arc::clone(&store),
            processed,
            None,
        );

        generator.generate(&hash, version).await.unwrap();
        assert_eq!(
            store
                .sibling_status(&hash, version, SiblingKind::VisualHtml)
                .await,
            SiblingStatus::Ready
        );
        let html = store
            .read_sibling(&hash, version, SiblingKind::VisualHtml)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(html).unwrap(), "<html><body>ok</body></html>");

        // Second call is a no-op.
        generator.generate(&hash, version).await.unwrap();
        assert_eq!(lm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_sibling_triggers_regeneration_despite_registry() {
        let (tmp, store, hash, version) = setup().await;
        let lm = Arc::new(HtmlLm {
            calls: AtomicU32::new(0),
        });
        let processed = Arc::new(ProcessedSet::load(tmp.path().join("visual.json")));
        let generator = VisualGenerator::new(
            Arc::clone(&lm) as Arc<dyn LmClient>,
            Arc::clone(&store),
            processed,
            None,
        );

        generator.generate(&hash, version).await.unwrap();
        // Delete the sibling behind the registry's back.
        std::fs::remove_file(store.sibling_path(&hash, version, SiblingKind::VisualHtml)).unwrap();

        generator.generate(&hash, version).await.unwrap();
        assert_eq!(lm.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            store
                .sibling_status(&hash, version, SiblingKind::VisualHtml)
                .await,
            SiblingStatus::Ready
        );
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fence("```html\n<p/>\n```"), "<p/>");
        assert_eq!(strip_code_fence("```\n<p/>\n```"), "<p/>");
        assert_eq!(strip_code_fence("<p/>"), "<p/>");
    }
}
