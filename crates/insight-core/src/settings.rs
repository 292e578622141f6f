//! Runtime settings resolved from the environment.
//!
//! These are pure domain types with no infrastructure dependencies; the
//! bootstrap loads `.env` (via `dotenvy`) before calling [`Settings::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default worker count for the analysis pool.
pub const DEFAULT_MAX_WORKERS: usize = 3;
/// Default bounded capacity of the analysis queue.
pub const DEFAULT_QUEUE_MAX_SIZE: usize = 100;
/// Default per-task deadline in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 3600;
/// Default bounded sub-concurrency for chapter generation.
pub const DEFAULT_CHAPTER_SUBCONCURRENCY: usize = 5;
/// Default retry budget for transient chapter failures.
pub const DEFAULT_CHAPTER_RETRY_MAX: u32 = 3;
/// Default initial backoff in seconds.
pub const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 2;
/// Default backoff ceiling in seconds.
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;
/// Default maximum accepted text/Markdown upload (10 MiB).
pub const DEFAULT_MAX_TEXT_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Default maximum accepted binary upload (50 MiB).
pub const DEFAULT_MAX_BINARY_FILE_SIZE: u64 = 50 * 1024 * 1024;
/// Default ceiling on extracted TTS text.
pub const DEFAULT_TTS_MAX_TEXT_CHARS: usize = 8000;

/// Application settings, fully resolved with defaults applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Worker count W for the analysis pool.
    pub max_concurrent_analysis_tasks: usize,
    /// Bounded queue capacity Q.
    pub analysis_queue_max_size: usize,
    /// Per-task deadline in seconds.
    pub analysis_task_timeout_secs: u64,
    /// Phase-C chapter sub-concurrency S.
    pub chapter_subconcurrency: usize,
    /// Transient-retry budget K.
    pub chapter_retry_max: u32,
    pub chapter_backoff_initial_secs: u64,
    pub chapter_backoff_max_secs: u64,
    /// LM vendor API key (opaque to the core).
    pub lm_vendor_api_key: Option<String>,
    /// Preferred model identifier handed to the LM adapter.
    pub preferred_model: Option<String>,
    /// Bearer token accepted on mutating routes.
    pub auth_bearer_token: Option<String>,
    pub artifact_root: PathBuf,
    pub trash_root: PathBuf,
    pub tts_cache_root: PathBuf,
    pub max_text_file_size: u64,
    pub max_binary_file_size: u64,
    pub tts_max_text_chars: usize,
    /// Log level: debug | info | warn | error.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Settings {
    /// Settings with every field at its documented default.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            max_concurrent_analysis_tasks: DEFAULT_MAX_WORKERS,
            analysis_queue_max_size: DEFAULT_QUEUE_MAX_SIZE,
            analysis_task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            chapter_subconcurrency: DEFAULT_CHAPTER_SUBCONCURRENCY,
            chapter_retry_max: DEFAULT_CHAPTER_RETRY_MAX,
            chapter_backoff_initial_secs: DEFAULT_BACKOFF_INITIAL_SECS,
            chapter_backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            lm_vendor_api_key: None,
            preferred_model: None,
            auth_bearer_token: None,
            artifact_root: PathBuf::from("data/artifacts"),
            trash_root: PathBuf::from("data/trash"),
            tts_cache_root: PathBuf::from("data/tts-cache"),
            max_text_file_size: DEFAULT_MAX_TEXT_FILE_SIZE,
            max_binary_file_size: DEFAULT_MAX_BINARY_FILE_SIZE,
            tts_max_text_chars: DEFAULT_TTS_MAX_TEXT_CHARS,
            log_level: "info".to_string(),
        }
    }

    /// Resolve settings from the process environment, falling back to the
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::with_defaults();
        Self {
            max_concurrent_analysis_tasks: env_parse(
                "MAX_CONCURRENT_ANALYSIS_TASKS",
                defaults.max_concurrent_analysis_tasks,
            ),
            analysis_queue_max_size: env_parse(
                "ANALYSIS_QUEUE_MAX_SIZE",
                defaults.analysis_queue_max_size,
            ),
            analysis_task_timeout_secs: env_parse(
                "ANALYSIS_TASK_TIMEOUT",
                defaults.analysis_task_timeout_secs,
            ),
            chapter_subconcurrency: env_parse(
                "CHAPTER_SUBCONCURRENCY",
                defaults.chapter_subconcurrency,
            ),
            chapter_retry_max: env_parse("CHAPTER_RETRY_MAX", defaults.chapter_retry_max),
            chapter_backoff_initial_secs: env_parse(
                "CHAPTER_BACKOFF_INITIAL_SEC",
                defaults.chapter_backoff_initial_secs,
            ),
            chapter_backoff_max_secs: env_parse(
                "CHAPTER_BACKOFF_MAX_SEC",
                defaults.chapter_backoff_max_secs,
            ),
            lm_vendor_api_key: env_string("LM_VENDOR_API_KEY"),
            preferred_model: env_string("PREFERRED_MODEL"),
            auth_bearer_token: env_string("AUTH_BEARER_TOKEN"),
            artifact_root: env_path("ARTIFACT_ROOT", defaults.artifact_root),
            trash_root: env_path("TRASH_ROOT", defaults.trash_root),
            tts_cache_root: env_path("TTS_CACHE_ROOT", defaults.tts_cache_root),
            max_text_file_size: env_parse("MAX_TEXT_FILE_SIZE", defaults.max_text_file_size),
            max_binary_file_size: env_parse("MAX_BINARY_FILE_SIZE", defaults.max_binary_file_size),
            tts_max_text_chars: env_parse("TTS_MAX_TEXT_CHARS", defaults.tts_max_text_chars),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Per-task deadline as a `Duration`.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_task_timeout_secs)
    }

    /// Initial chapter backoff as a `Duration`.
    #[must_use]
    pub const fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.chapter_backoff_initial_secs)
    }

    /// Backoff ceiling as a `Duration`.
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.chapter_backoff_max_secs)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env_string(key).map_or(default, PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {key}={raw}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::with_defaults();
        assert_eq!(settings.max_concurrent_analysis_tasks, 3);
        assert_eq!(settings.analysis_queue_max_size, 100);
        assert_eq!(settings.analysis_task_timeout_secs, 3600);
        assert_eq!(settings.chapter_subconcurrency, 5);
        assert_eq!(settings.chapter_retry_max, 3);
        assert_eq!(settings.task_timeout(), Duration::from_secs(3600));
        assert_eq!(settings.max_text_file_size, 10 * 1024 * 1024);
        assert_eq!(settings.max_binary_file_size, 50 * 1024 * 1024);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // Unset key falls back
        assert_eq!(env_parse("INSIGHT_TEST_UNSET_KEY_12345", 7usize), 7);
    }
}
