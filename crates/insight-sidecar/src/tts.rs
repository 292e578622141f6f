//! TTS pre-generation with a resumable chunk cache.
//!
//! The readable plain text is extracted from the artifact Markdown, split
//! into sentence-bounded chunks, and synthesized one chunk at a time into
//! `<tts_root>/<doc_hash>/<fingerprint>/chunk_NNN.wav`. The cache metadata
//! records `chunks_generated` / `total_chunks`, so an interrupted run (or a
//! reconnecting subscriber) resumes instead of starting over.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use insight_core::{DocHash, TaskError, TaskErrorKind, TtsEngine};
use insight_store::ArtifactStore;

/// Broadcast buffer per document stream.
const STREAM_CAPACITY: usize = 128;

/// Target characters per synthesized chunk.
const CHUNK_TARGET_CHARS: usize = 600;

/// Events streamed to TTS subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsEvent {
    /// One synthesized chunk, base64 audio, indices strictly increasing.
    Chunk { index: usize, audio_b64: String },
    /// All chunks are cached.
    Complete { total_chunks: usize },
    /// Generation failed; the cache keeps whatever was produced.
    Error { message: String },
}

/// Persisted cache metadata for one (document, voice, language, text) key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsCacheMeta {
    pub voice: String,
    pub language: String,
    /// Fingerprint of (text, voice, language); a changed document gets a
    /// fresh cache directory.
    pub fingerprint: String,
    pub total_chunks: usize,
    pub chunks_generated: usize,
    pub complete: bool,
}

/// TTS pre-generation service over a synthesis capability.
pub struct TtsService {
    engine: Arc<dyn TtsEngine>,
    store: Arc<ArtifactStore>,
    voice: String,
    language: String,
    max_text_chars: usize,
    streams: Mutex<HashMap<String, broadcast::Sender<TtsEvent>>>,
}

impl TtsService {
    #[must_use]
    pub fn new(
        engine: Arc<dyn TtsEngine>,
        store: Arc<ArtifactStore>,
        voice: impl Into<String>,
        language: impl Into<String>,
        max_text_chars: usize,
    ) -> Self {
        Self {
            engine,
            store,
            voice: voice.into(),
            language: language.into(),
            max_text_chars,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to chunk events for a document.
    pub fn subscribe(&self, doc_hash: &DocHash) -> broadcast::Receiver<TtsEvent> {
        self.sender(doc_hash).subscribe()
    }

    /// Cache state for the latest version of a document, if any text was
    /// ever extracted for the current voice/language.
    pub async fn status(&self, doc_hash: &DocHash) -> Option<TtsCacheMeta> {
        let artifact = self.store.get_latest(doc_hash).await.ok()?;
        let text = extract_readable_text(&artifact.body, self.max_text_chars);
        let fingerprint = fingerprint(&text, &self.voice, &self.language);
        let meta_path = self.cache_dir(doc_hash, &fingerprint).join("meta.json");
        let raw = tokio::fs::read_to_string(&meta_path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Synthesize (or resume synthesizing) the chunk cache for the latest
    /// version of a document, streaming chunk events to subscribers.
    pub async fn pregenerate(&self, doc_hash: &DocHash) -> Result<TtsCacheMeta, TaskError> {
        let artifact = self.store.get_latest(doc_hash).await.map_err(|e| {
            TaskError::new(TaskErrorKind::SourceAcquisitionFailed, "tts", e.to_string())
        })?;
        let text = extract_readable_text(&artifact.body, self.max_text_chars);
        if text.is_empty() {
            return Err(TaskError::new(
                TaskErrorKind::UnsupportedSource,
                "tts",
                "no readable text in artifact",
            ));
        }

        let chunks = chunk_text(&text, CHUNK_TARGET_CHARS);
        let fingerprint = fingerprint(&text, &self.voice, &self.language);
        let cache_dir = self.cache_dir(doc_hash, &fingerprint);
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| TaskError::persistence("tts", e.to_string()))?;
        let meta_path = cache_dir.join("meta.json");

        let mut meta = match read_meta(&meta_path).await {
            Some(existing)
                if existing.fingerprint == fingerprint
                    && existing.total_chunks == chunks.len() =>
            {
                existing
            }
            _ => TtsCacheMeta {
                voice: self.voice.clone(),
                language: self.language.clone(),
                fingerprint: fingerprint.clone(),
                total_chunks: chunks.len(),
                chunks_generated: 0,
                complete: false,
            },
        };

        if meta.complete {
            tracing::debug!(doc_hash = %doc_hash, "tts cache already complete");
            return Ok(meta);
        }

        let sender = self.sender(doc_hash);
        for (index, chunk) in chunks.iter().enumerate().skip(meta.chunks_generated) {
            let audio = match self
                .engine
                .synthesize(chunk, &self.voice, &self.language)
                .await
            {
                Ok(audio) => audio,
                Err(e) => {
                    let _ = sender.send(TtsEvent::Error {
                        message: e.message.clone(),
                    });
                    return Err(TaskError::new(TaskErrorKind::Internal, "tts", e.message));
                }
            };

            let chunk_path = cache_dir.join(format!("chunk_{index:03}.wav"));
            write_bytes_atomic(&chunk_path, &audio)
                .await
                .map_err(|e| TaskError::persistence("tts", e.to_string()))?;

            meta.chunks_generated = index + 1;
            write_meta(&meta_path, &meta)
                .await
                .map_err(|e| TaskError::persistence("tts", e.to_string()))?;

            let _ = sender.send(TtsEvent::Chunk {
                index,
                audio_b64: BASE64.encode(&audio),
            });
        }

        meta.complete = true;
        write_meta(&meta_path, &meta)
            .await
            .map_err(|e| TaskError::persistence("tts", e.to_string()))?;
        let _ = sender.send(TtsEvent::Complete {
            total_chunks: meta.total_chunks,
        });
        tracing::info!(doc_hash = %doc_hash, chunks = meta.total_chunks, "tts cache complete");
        Ok(meta)
    }

    /// Read a cached chunk's bytes.
    pub async fn read_chunk(
        &self,
        doc_hash: &DocHash,
        fingerprint: &str,
        index: usize,
    ) -> Option<Vec<u8>> {
        let path = self
            .cache_dir(doc_hash, fingerprint)
            .join(format!("chunk_{index:03}.wav"));
        tokio::fs::read(path).await.ok()
    }

    fn cache_dir(&self, doc_hash: &DocHash, fingerprint: &str) -> PathBuf {
        self.store
            .tts_cache_root()
            .join(doc_hash.as_str())
            .join(fingerprint)
    }

    fn sender(&self, doc_hash: &DocHash) -> broadcast::Sender<TtsEvent> {
        let mut streams = match self.streams.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        streams
            .entry(doc_hash.to_string())
            .or_insert_with(|| broadcast::channel(STREAM_CAPACITY).0)
            .clone()
    }
}

async fn read_meta(path: &Path) -> Option<TtsCacheMeta> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

async fn write_meta(path: &Path, meta: &TtsCacheMeta) -> std::io::Result<()> {
    let raw = serde_json::to_string_pretty(meta)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_bytes_atomic(path, raw.as_bytes()).await
}

/// Temp-file-then-rename write in the target's directory.
async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".tmp-{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Fingerprint of (text, voice, language), 12 hex chars.
fn fingerprint(text: &str, voice: &str, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(voice.as_bytes());
    hasher.update(language.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Extract the readable plain text from artifact Markdown.
///
/// Drops fenced code blocks, images, HTML tags, wide tables, and Markdown
/// decoration; truncates on a sentence boundary near `max_chars`.
#[must_use]
pub fn extract_readable_text(markdown: &str, max_chars: usize) -> String {
    let mut lines = Vec::new();
    let mut in_code_fence = false;
    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code_fence = !in_code_fence;
            continue;
        }
        if in_code_fence {
            continue;
        }
        // Wide tables read terribly aloud.
        if trimmed.starts_with('|') && trimmed.matches('|').count() > 4 {
            continue;
        }
        if trimmed.starts_with("|-") || trimmed.starts_with("| -") {
            continue;
        }
        let cleaned = clean_inline(trimmed);
        if !cleaned.is_empty() {
            lines.push(cleaned);
        }
    }
    let text = lines.join("\n");
    truncate_on_sentence(&text, max_chars)
}

/// Strip inline Markdown/HTML decoration from one line.
fn clean_inline(line: &str) -> String {
    let line = line.trim_start_matches(['#', '>', ' ']);
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // Images vanish entirely; links keep their text.
            '!' if chars.peek() == Some(&'[') => {
                skip_bracketed(&mut chars);
            }
            '[' => {
                let mut text = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    text.push(inner);
                }
                if chars.peek() == Some(&'(') {
                    for inner in chars.by_ref() {
                        if inner == ')' {
                            break;
                        }
                    }
                }
                out.push_str(&text);
            }
            '<' => {
                for inner in chars.by_ref() {
                    if inner == '>' {
                        break;
                    }
                }
            }
            '*' | '_' | '`' => {}
            _ => out.push(c),
        }
    }
    out.trim().to_string()
}

fn skip_bracketed(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    chars.next(); // consume '['
    for inner in chars.by_ref() {
        if inner == ']' {
            break;
        }
    }
    if chars.peek() == Some(&'(') {
        for inner in chars.by_ref() {
            if inner == ')' {
                break;
            }
        }
    }
}

/// Truncate near `max_chars`, preferring the last sentence end before it.
fn truncate_on_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    let boundary = clipped
        .char_indices()
        .filter(|(_, c)| matches!(c, '。' | '！' | '？' | '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .next_back();
    match boundary {
        Some(end) => clipped[..end].to_string(),
        None => clipped,
    }
}

/// Split text into sentence-bounded chunks of roughly `target` chars.
#[must_use]
pub fn chunk_text(text: &str, target: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut sentence = String::new();
    for c in text.chars() {
        sentence.push(c);
        if matches!(c, '。' | '！' | '？' | '.' | '!' | '?' | '\n') {
            if current.chars().count() + sentence.chars().count() > target
                && !current.is_empty()
            {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            current.push_str(&sentence);
            sentence.clear();
        }
    }
    current.push_str(&sentence);
    let tail = current.trim();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks.retain(|chunk| !chunk.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use insight_core::{DocHeader, TtsError};
    use insight_store::CanonicalSource;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEngine {
        calls: AtomicU32,
        fail_at: Option<u32>,
    }

    #[async_trait]
    impl TtsEngine for CountingEngine {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &str,
            _language: &str,
        ) -> Result<Vec<u8>, TtsError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_at {
                return Err(TtsError::new("synthesis backend down"));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    async fn setup(body: &str) -> (tempfile::TempDir, Arc<ArtifactStore>, DocHash) {
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
        let (hash, _) = store
            .commit(
                &CanonicalSource::File {
                    content_digest_hex: insight_core::sha256_hex(b"x"),
                    title: "T".to_string(),
                },
                &header,
                body,
            )
            .await
            .unwrap();
        (tmp, store, hash)
    }

    fn service(
        store: Arc<ArtifactStore>,
        engine: Arc<CountingEngine>,
    ) -> TtsService {
        TtsService::new(engine, store, "warm", "zh", 8000)
    }

    #[test]
    fn extraction_strips_code_images_and_wide_tables() {
        let markdown = "# 标题\n\n正文第一句。\n\n```rust\nfn hidden() {}\n```\n\n\
                        ![图片](img.png)\n\n| a | b | c | d |\n|---|---|---|---|\n\
                        | 1 | 2 | 3 | 4 |\n\n[链接文字](https://example.com) 继续。\n";
        let text = extract_readable_text(markdown, 8000);
        assert!(text.contains("标题"));
        assert!(text.contains("正文第一句。"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("img.png"));
        assert!(!text.contains("| a |"));
        assert!(text.contains("链接文字 继续。"));
    }

    #[test]
    fn truncation_ends_on_a_sentence() {
        let text = "一句。二句。三句很长很长很长。";
        let truncated = truncate_on_sentence(text, 6);
        assert_eq!(truncated, "一句。二句。");
    }

    #[test]
    fn chunks_respect_sentence_boundaries() {
        let text = "第一句。第二句。第三句。";
        let chunks = chunk_text(text, 5);
        assert_eq!(chunks, vec!["第一句。", "第二句。", "第三句。"]);

        let joined: String = chunks.join("");
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn pregenerate_caches_chunks_and_streams_events() {
        let (_tmp, store, hash) = setup("第一句。第二句。\n").await;
        let engine = Arc::new(CountingEngine {
            calls: AtomicU32::new(0),
            fail_at: None,
        });
        let tts = service(Arc::clone(&store), engine);
        let mut events = tts.subscribe(&hash);

        let meta = tts.pregenerate(&hash).await.unwrap();
        assert!(meta.complete);
        assert_eq!(meta.chunks_generated, meta.total_chunks);

        // Chunk events carry increasing indices and end with Complete.
        let mut last_index = None;
        loop {
            match events.try_recv() {
                Ok(TtsEvent::Chunk { index, .. }) => {
                    if let Some(prev) = last_index {
                        assert!(index > prev);
                    }
                    last_index = Some(index);
                }
                Ok(TtsEvent::Complete { total_chunks }) => {
                    assert_eq!(total_chunks, meta.total_chunks);
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        // Cached: a second run synthesizes nothing new.
        let again = tts.pregenerate(&hash).await.unwrap();
        assert_eq!(again, meta);
        assert!(tts.read_chunk(&hash, &meta.fingerprint, 0).await.is_some());
    }

    #[tokio::test]
    async fn interrupted_generation_resumes_from_the_cache() {
        // Long enough to split into several chunks at the default target.
        let body = "这是一个足够长的句子，用来把文本切成多个语音块。".repeat(80);
        let (_tmp, store, hash) = setup(&body).await;

        // First attempt dies on the second chunk.
        let failing = Arc::new(CountingEngine {
            calls: AtomicU32::new(0),
            fail_at: Some(1),
        });
        let tts = service(Arc::clone(&store), Arc::clone(&failing));
        assert!(tts.pregenerate(&hash).await.is_err());

        let partial = tts.status(&hash).await.expect("partial meta persisted");
        assert!(!partial.complete);
        assert_eq!(partial.chunks_generated, 1);
        assert!(partial.total_chunks > 1);

        // Resume path: a healthy engine finishes only the remainder.
        let healthy = Arc::new(CountingEngine {
            calls: AtomicU32::new(0),
            fail_at: None,
        });
        let tts = service(Arc::clone(&store), Arc::clone(&healthy));
        let meta = tts.pregenerate(&hash).await.unwrap();
        assert!(meta.complete);
        assert_eq!(
            healthy.calls.load(Ordering::SeqCst) as usize,
            meta.total_chunks - partial.chunks_generated
        );
    }

    #[tokio::test]
    async fn status_is_none_before_any_generation() {
        let (_tmp, store, hash) = setup("正文。").await;
        let engine = Arc::new(CountingEngine {
            calls: AtomicU32::new(0),
            fail_at: None,
        });
        let tts = service(store, engine);
        assert!(tts.status(&hash).await.is_none());
    }
}
