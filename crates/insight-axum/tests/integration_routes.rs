//! End-to-end route tests over the real context with scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use insight_axum::bootstrap::{Collaborators, build_context};
use insight_axum::routes::build_router;
use insight_core::{
    ChapterPlan, GenerateRequest, LmClient, LmError, Outline, PdfError, PdfRenderer, Settings,
    TtsEngine, TtsError,
};

const TEST_TOKEN: &str = "integration-secret";

/// Scripted LM: instant outline + chapters, optional artificial latency.
struct ScriptedLm {
    latency: Duration,
}

#[async_trait]
impl LmClient for ScriptedLm {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LmError> {
        tokio::time::sleep(self.latency).await;
        if request.prompt.contains("第 1 章") {
            Ok("## 第一章\n\n正文。".to_string())
        } else if request.prompt.contains("单文件 HTML") {
            Ok("<html><body>视觉版</body></html>".to_string())
        } else {
            Ok("## 洞见与启发\n- 一\n\n<!--intro-->\n引言。".to_string())
        }
    }

    async fn generate_outline(&self, _request: GenerateRequest) -> Result<Outline, LmError> {
        tokio::time::sleep(self.latency).await;
        Ok(Outline {
            title_cn: "深度解读".to_string(),
            introduction: "初版引言。".to_string(),
            chapters: vec![ChapterPlan {
                id: 1,
                title: "第一章".to_string(),
                summary: "概要".to_string(),
            }],
        })
    }
}

struct EchoTts;

#[async_trait]
impl TtsEngine for EchoTts {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        _language: &str,
    ) -> Result<Vec<u8>, TtsError> {
        Ok(text.as_bytes().to_vec())
    }
}

struct StubPdf;

#[async_trait]
impl PdfRenderer for StubPdf {
    async fn render(&self, _markdown: &str, _title: &str) -> Result<Vec<u8>, PdfError> {
        Ok(b"%PDF-1.4 stub".to_vec())
    }
}

async fn test_router(tmp: &tempfile::TempDir, workers: usize, queue: usize) -> Router {
    test_router_with_latency(tmp, workers, queue, Duration::ZERO).await
}

async fn test_router_with_latency(
    tmp: &tempfile::TempDir,
    workers: usize,
    queue: usize,
    latency: Duration,
) -> Router {
    let settings = Settings {
        max_concurrent_analysis_tasks: workers,
        analysis_queue_max_size: queue,
        auth_bearer_token: Some(TEST_TOKEN.to_string()),
        artifact_root: tmp.path().join("artifacts"),
        trash_root: tmp.path().join("trash"),
        tts_cache_root: tmp.path().join("tts"),
        ..Settings::with_defaults()
    };
    let collaborators = Collaborators {
        lm: Arc::new(ScriptedLm { latency }),
        tts_engine: Arc::new(EchoTts),
        pdf: Arc::new(StubPdf),
    };
    let state = build_context(settings, collaborators).await.unwrap();
    build_router(state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn submit_request(body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/tasks")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_for_status(router: &Router, task_id: &str, wanted: &str) -> serde_json::Value {
    for _ in 0..300 {
        let response = router
            .clone()
            .oneshot(get(&format!("/api/tasks/{task_id}")))
            .await
            .unwrap();
        let snapshot = json_body(response).await;
        if snapshot["status"] == wanted {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached status {wanted}");
}

fn document_submission() -> serde_json::Value {
    serde_json::json!({
        "task_type": "document",
        "text": "Hello, world.\n",
        "title": "T",
    })
}

#[tokio::test]
async fn document_task_runs_to_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 2, 10).await;

    let response = router
        .clone()
        .oneshot(submit_request(&document_submission()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "created");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let snapshot = wait_for_status(&router, &task_id, "succeeded").await;
    let doc_hash = snapshot["result_ref"]["doc_hash"].as_str().unwrap().to_string();
    assert_eq!(snapshot["result_ref"]["version"], 1);
    assert_eq!(snapshot["progress_pct"], 100);

    // Listing sees it, with a cache version for pollers.
    let list = json_body(
        router
            .clone()
            .oneshot(get("/api/artifacts"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(list["items"].as_array().unwrap().len(), 1);
    let cache_version = list["cache_version"].as_u64().unwrap();

    let unchanged = json_body(
        router
            .clone()
            .oneshot(get(&format!("/api/artifacts?known_version={cache_version}")))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(unchanged["unchanged"], true);

    // The stored Markdown round-trips through the header codec.
    let response = router
        .clone()
        .oneshot(get(&format!("/api/artifacts/{doc_hash}/markdown")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let raw = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(raw.to_vec()).unwrap();
    assert!(text.starts_with("---\n"));
    assert!(text.contains("title_cn: 深度解读"));

    // On-demand PDF renders and caches.
    let response = router
        .clone()
        .oneshot(get(&format!("/api/artifacts/{doc_hash}/pdf")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn resubmission_creates_version_two() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    for expected_version in 1..=2u64 {
        let body = json_body(
            router
                .clone()
                .oneshot(submit_request(&document_submission()))
                .await
                .unwrap(),
        )
        .await;
        let task_id = body["task_id"].as_str().unwrap().to_string();
        let snapshot = wait_for_status(&router, &task_id, "succeeded").await;
        assert_eq!(snapshot["result_ref"]["version"], expected_version);
    }

    let list = json_body(
        router
            .clone()
            .oneshot(get("/api/artifacts"))
            .await
            .unwrap(),
    )
    .await;
    // Same doc_hash: one summary at version 2.
    let items = list["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["version"], 2);
}

#[tokio::test]
async fn queue_full_returns_503() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router_with_latency(&tmp, 1, 2, Duration::from_secs(30)).await;

    // First task occupies the single worker.
    let first = json_body(
        router
            .clone()
            .oneshot(submit_request(&document_submission()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(first["status"], "created");
    for _ in 0..100 {
        let stats = json_body(
            router
                .clone()
                .oneshot(get("/api/queue/stats"))
                .await
                .unwrap(),
        )
        .await;
        if stats["in_flight"] == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Two more fill the queue; the fourth is rejected synchronously.
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(submit_request(&document_submission()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = router
        .clone()
        .oneshot(submit_request(&document_submission()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["type"], "queue_full");

    let stats = json_body(
        router
            .clone()
            .oneshot(get("/api/queue/stats"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(stats["queued"], 2);
    assert_eq!(stats["in_flight"], 1);
}

#[tokio::test]
async fn invalid_submissions_are_400() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    // Out-of-range priority.
    let mut body = document_submission();
    body["priority"] = serde_json::json!(9);
    let response = router.clone().oneshot(submit_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing required field.
    let body = serde_json::json!({ "task_type": "youtube" });
    let response = router.clone().oneshot(submit_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unsupported upload format.
    let body = serde_json::json!({
        "task_type": "pdf",
        "file_ref": "files/x",
        "mime": "application/zip",
        "title": "T",
        "content_fingerprint": "ab12",
    });
    let response = router.clone().oneshot(submit_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mutating_routes_require_the_bearer_token() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    // Produce an artifact to delete.
    let body = json_body(
        router
            .clone()
            .oneshot(submit_request(&document_submission()))
            .await
            .unwrap(),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    let snapshot = wait_for_status(&router, &task_id, "succeeded").await;
    let doc_hash = snapshot["result_ref"]["doc_hash"].as_str().unwrap().to_string();

    // No token: rejected.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/artifacts/{doc_hash}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With the token: soft-deleted into the trash.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/artifacts/{doc_hash}"))
                .header("authorization", format!("Bearer {TEST_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let trash = json_body(router.clone().oneshot(get("/api/trash")).await.unwrap()).await;
    let entries = trash.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    let entry = entries[0]["name"].as_str().unwrap().to_string();

    // Restore brings the artifact back.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/trash/{entry}/restore"))
                .header("authorization", format!("Bearer {TEST_TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get(&format!("/api/artifacts/{doc_hash}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_task_and_artifact_are_404() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    let response = router
        .clone()
        .oneshot(get("/api/tasks/nonexistent-task"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(get("/api/artifacts/abc123def456"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lookup_reports_known_video_sources() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    let submission = serde_json::json!({
        "task_type": "youtube",
        "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
        "text": "subtitle text",
        "title": "A Talk (STG301)",
    });
    let body = json_body(
        router
            .clone()
            .oneshot(submit_request(&submission))
            .await
            .unwrap(),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();
    wait_for_status(&router, &task_id, "succeeded").await;

    let found = json_body(
        router
            .clone()
            .oneshot(get("/api/lookup?video_id=dQw4w9WgXcQ"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(found["found"], true);
    assert!(found["doc_hash"].as_str().is_some());

    let missing = json_body(
        router
            .clone()
            .oneshot(get("/api/lookup?video_id=AAAAAAAAAAA"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(missing["found"], false);
}

#[tokio::test]
async fn reconnect_returns_the_same_task() {
    let tmp = tempfile::tempdir().unwrap();
    let router = test_router(&tmp, 1, 10).await;

    let body = json_body(
        router
            .clone()
            .oneshot(submit_request(&document_submission()))
            .await
            .unwrap(),
    )
    .await;
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let mut resubmit = document_submission();
    resubmit["task_id"] = serde_json::json!(task_id);
    let body = json_body(
        router
            .clone()
            .oneshot(submit_request(&resubmit))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(body["status"], "reconnected");
    assert_eq!(body["task_id"].as_str().unwrap(), task_id);
}
