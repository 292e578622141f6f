//! Request/response DTOs for the HTTP surface.

use serde::{Deserialize, Serialize};

use insight_core::{ArtifactSummary, Priority, TaskId, TaskPayload, TaskType};
use insight_tasks::QueueInfo;

/// Submission request: one of the source fields per task type.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTaskRequest {
    /// youtube | pdf | document | ultra_deep
    pub task_type: TaskType,
    /// Subtitle-sourced jobs: the source URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Cleaned subtitle text / inline document body.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Uploaded-file jobs: vendor file reference + mime + fingerprint.
    #[serde(default)]
    pub file_ref: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub content_fingerprint: Option<String>,
    /// Enrichment jobs: the artifact to deepen.
    #[serde(default)]
    pub doc_hash: Option<String>,
    /// Priority level 0..=3; `Normal` when omitted.
    #[serde(default)]
    pub priority: Option<u8>,
    /// Reconnect to an existing task instead of creating a new one.
    #[serde(default)]
    pub task_id: Option<String>,
}

impl SubmitTaskRequest {
    /// Resolve the priority field, rejecting out-of-range levels.
    pub fn resolved_priority(&self) -> Result<Priority, String> {
        match self.priority {
            None => Ok(Priority::Normal),
            Some(level) => Priority::from_level(level)
                .ok_or_else(|| format!("priority must be 0..=3, got {level}")),
        }
    }

    /// Build the typed payload for the requested task type.
    pub fn into_payload(self) -> Result<TaskPayload, String> {
        match self.task_type {
            TaskType::Youtube => {
                let url = self.url.ok_or("youtube tasks require `url`")?;
                let text = self.text.ok_or("youtube tasks require subtitle `text`")?;
                Ok(TaskPayload::Subtitle {
                    url,
                    text,
                    title: self.title,
                })
            }
            TaskType::Pdf => {
                let file_ref = self.file_ref.ok_or("pdf tasks require `file_ref`")?;
                let mime = self.mime.unwrap_or_else(|| "application/pdf".to_string());
                let title = self.title.ok_or("pdf tasks require `title`")?;
                let content_fingerprint = self
                    .content_fingerprint
                    .ok_or("pdf tasks require `content_fingerprint`")?;
                Ok(TaskPayload::Upload {
                    file_ref,
                    mime,
                    title,
                    content_fingerprint,
                })
            }
            TaskType::Document => {
                // Inline text or an uploaded file reference.
                if let Some(body) = self.text {
                    let title = self.title.ok_or("document tasks require `title`")?;
                    Ok(TaskPayload::Text { body, title })
                } else {
                    let file_ref = self
                        .file_ref
                        .ok_or("document tasks require `text` or `file_ref`")?;
                    let mime = self
                        .mime
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    let title = self.title.ok_or("document tasks require `title`")?;
                    let content_fingerprint = self
                        .content_fingerprint
                        .ok_or("document uploads require `content_fingerprint`")?;
                    Ok(TaskPayload::Upload {
                        file_ref,
                        mime,
                        title,
                        content_fingerprint,
                    })
                }
            }
            TaskType::UltraDeep => {
                let doc_hash = self.doc_hash.ok_or("ultra_deep tasks require `doc_hash`")?;
                Ok(TaskPayload::Enrich { doc_hash })
            }
            TaskType::Visual | TaskType::TtsPregen => {
                Err("visual and tts_pregen run on the sidecar pipeline".to_string())
            }
        }
    }
}

/// Submission response.
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
    /// created | reconnected
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_info: Option<QueueInfo>,
}

/// Artifact listing response with the index cache version.
#[derive(Debug, Serialize)]
pub struct ArtifactListResponse {
    pub cache_version: u64,
    /// True when the caller's `known_version` still matches; `items` is
    /// empty in that case.
    pub unchanged: bool,
    pub items: Vec<ArtifactSummary>,
}

/// Query for the artifact list.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub known_version: Option<u64>,
}

/// Query for event streams.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<u64>,
}

/// Query for external-key lookup.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub video_id: String,
}

/// Lookup response.
#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// TTS pre-generation request.
#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub doc_hash: String,
}
