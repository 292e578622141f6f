//! Artifact reads, trash management, lookup, and on-demand PDF.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;

use insight_core::{DocHash, SiblingKind};
use insight_store::StoreError;

use crate::dto::{ArtifactListResponse, ListQuery, LookupQuery, LookupResponse};
use crate::error::HttpError;
use crate::handlers::require_bearer;
use crate::state::AppState;

fn parse_hash(raw: &str) -> Result<DocHash, HttpError> {
    DocHash::parse(raw).ok_or_else(|| HttpError::BadRequest(format!("malformed doc_hash: {raw}")))
}

/// `GET /artifacts?known_version=` - summaries from the memoized index.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ArtifactListResponse>, HttpError> {
    // Cheap short-circuit before touching the index.
    if let Some(known) = query.known_version {
        if known == state.store.cache_version() {
            return Ok(Json(ArtifactListResponse {
                cache_version: known,
                unchanged: true,
                items: Vec::new(),
            }));
        }
    }
    let result = state.store.list_all().await?;
    Ok(Json(ArtifactListResponse {
        cache_version: result.cache_version,
        unchanged: false,
        items: result.snapshot.summaries.clone(),
    }))
}

/// `GET /artifacts/{hash}` - latest version, parsed.
pub async fn get_latest(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    Ok(Json(state.store.get_latest(&doc_hash).await?))
}

/// `GET /artifacts/{hash}/versions/{version}`.
pub async fn get_version(
    State(state): State<AppState>,
    Path((hash, version)): Path<(String, u32)>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    Ok(Json(state.store.get_version(&doc_hash, version).await?))
}

/// `GET /artifacts/{hash}/markdown` - the raw stored file.
pub async fn markdown(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    let artifact = state.store.get_latest(&doc_hash).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        artifact.to_file_contents(),
    ))
}

/// `GET /artifacts/{hash}/visual` - the visual HTML sibling.
pub async fn visual(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    let artifact = state.store.get_latest(&doc_hash).await?;
    let bytes = state
        .store
        .read_sibling(&doc_hash, artifact.version, SiblingKind::VisualHtml)
        .await?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], bytes))
}

/// `GET /artifacts/{hash}/pdf` - generated on demand, cached as a sibling.
pub async fn pdf(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc_hash = parse_hash(&hash)?;
    let artifact = state.store.get_latest(&doc_hash).await?;

    let bytes = match state
        .store
        .read_sibling(&doc_hash, artifact.version, SiblingKind::Pdf)
        .await
    {
        Ok(bytes) => bytes,
        Err(StoreError::SiblingNotReady { .. }) => {
            let rendered = state
                .pdf
                .render(&artifact.body, &artifact.header.title_cn)
                .await
                .map_err(|e| HttpError::ServiceUnavailable(e.to_string()))?;
            state
                .store
                .write_sibling(&doc_hash, artifact.version, SiblingKind::Pdf, rendered.clone())
                .await?;
            rendered
        }
        Err(other) => return Err(other.into()),
    };
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

/// `DELETE /artifacts/{hash}` - soft delete into the trash subtree.
pub async fn delete(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    let doc_hash = parse_hash(&hash)?;
    let report = state.store.delete(&doc_hash).await?;
    Ok(Json(serde_json::json!({
        "trash_entry": report.trash_entry,
        "moved": report.moved.len(),
        "errors": report
            .errors
            .iter()
            .map(|(path, message)| serde_json::json!({
                "path": path.display().to_string(),
                "error": message,
            }))
            .collect::<Vec<_>>(),
        "complete": report.is_complete(),
    })))
}

/// `GET /trash` - entries, newest first.
pub async fn list_trash(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
    Ok(Json(state.store.list_trash().await?))
}

/// `POST /trash/{entry}/restore`.
pub async fn restore(
    State(state): State<AppState>,
    Path(entry): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    let doc_hash = state.store.restore(&entry).await?;
    Ok(Json(serde_json::json!({ "doc_hash": doc_hash })))
}

/// `DELETE /trash/{entry}` - permanent.
pub async fn purge(
    State(state): State<AppState>,
    Path(entry): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    state.store.purge(&entry).await?;
    Ok(Json(serde_json::json!({ "purged": entry })))
}

/// `GET /lookup?video_id=` - has this source already been analyzed?
pub async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, HttpError> {
    let found = state.store.lookup_by_external_key(&query.video_id).await?;
    Ok(Json(match found {
        Some((doc_hash, title)) => LookupResponse {
            found: true,
            doc_hash: Some(doc_hash.to_string()),
            title: Some(title),
        },
        None => LookupResponse {
            found: false,
            doc_hash: None,
            title: None,
        },
    }))
}

/// `POST /admin/refresh-index` - explicit invalidation.
pub async fn refresh_index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    require_bearer(&state, &headers)?;
    state.store.invalidate().await;
    Ok(Json(serde_json::json!({
        "cache_version": state.store.cache_version(),
    })))
}
