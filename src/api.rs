#![forbid(unsafe_code)]

//! HTTP surface: the two download endpoints plus an optional static root for
//! the presentation page.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, Request, header},
    response::{IntoResponse, Response},
    routing::post,
};
use mime_guess::MimeGuess;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::extractor::Extractor;
use crate::relay::{RelayQuery, relay};
use crate::resolver::{BODY_INVALID, ResolveRequest, ResolvedVideo, resolve};

/// Shared state injected into every handler. Nothing in here is mutable; each
/// request resolves or relays on its own.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub www_root: Option<Arc<PathBuf>>,
}

impl AppState {
    pub fn new(extractor: Arc<dyn Extractor>, www_root: Option<PathBuf>) -> Self {
        Self {
            extractor,
            www_root: www_root.map(Arc::new),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", post(resolve_video).get(relay_video))
        .fallback(static_fallback)
        .with_state(state)
}

/// The body is parsed whatever its declared content type; browsers and curl
/// users do not always send `application/json`.
async fn resolve_video(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ResolvedVideo>> {
    let payload: ResolveRequest = serde_json::from_slice(&body).map_err(|err| {
        debug!(error = %err, "rejecting resolve body");
        ApiError::validation(BODY_INVALID)
    })?;
    let url = payload.url();
    let resolved = resolve(state.extractor.as_ref(), url.as_deref(), payload.class()).await?;
    Ok(Json(resolved))
}

async fn relay_video(
    State(state): State<AppState>,
    query: Result<Query<RelayQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(|rejection| {
        debug!(%rejection, "rejecting relay query");
        ApiError::validation(crate::relay::PARAMS_REQUIRED)
    })?;
    relay(state.extractor.as_ref(), query).await
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    let Some(root) = state.www_root.as_deref() else {
        return ApiError::not_found("file not found").into_response();
    };

    match serve_www_path(root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html")).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

/// Maps a request path onto `root`, refusing anything but plain segments.
fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes have no extension; asset misses do.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::fake::{FakeExtractor, record, sample_info};
    use axum::{body::to_bytes, http::StatusCode};
    use serde_json::{Value, json};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn app(extractor: FakeExtractor, www_root: Option<PathBuf>) -> (Router, Arc<FakeExtractor>) {
        let extractor = Arc::new(extractor);
        let state = AppState::new(extractor.clone(), www_root);
        (router(state), extractor)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::post("/api/download")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn mixed_info() -> FakeExtractor {
        FakeExtractor::with_info(sample_info(vec![
            record("140", None, Some(128), false, true),
            record("18", Some("360p"), Some(96), true, true),
            record("139", None, Some(64), false, true),
            record("22", Some("720p"), Some(192), true, true),
        ]))
    }

    #[tokio::test]
    async fn resolve_returns_details_and_audio_formats() {
        let (app, _) = app(mixed_info(), None);
        let body = json!({ "url": "https://example.com/watch?v=abc", "format": "audio" });
        let response = app.oneshot(post_json(&body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let parsed = json_body(response).await;
        assert_eq!(parsed["videoDetails"]["title"], "Alpha Title");
        assert_eq!(parsed["videoDetails"]["author"], "Channel");
        assert_eq!(parsed["videoDetails"]["lengthSeconds"], "212");
        assert_eq!(parsed["videoDetails"]["viewCount"], "1500000");
        assert_eq!(
            parsed["videoDetails"]["thumbnail"],
            "https://i.example.com/alpha.jpg"
        );
        let formats = parsed["formats"].as_array().unwrap();
        let qualities: Vec<_> = formats.iter().map(|f| f["quality"].clone()).collect();
        assert_eq!(qualities, [json!("128kbps"), json!("64kbps")]);
    }

    #[tokio::test]
    async fn resolve_returns_video_formats_best_first() {
        let (app, _) = app(mixed_info(), None);
        let body = json!({ "url": "https://example.com/watch?v=abc", "format": "video" });
        let parsed = json_body(app.oneshot(post_json(&body.to_string())).await.unwrap()).await;
        let itags: Vec<_> = parsed["formats"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["itag"].clone())
            .collect();
        assert_eq!(itags, [json!("22"), json!("18")]);
    }

    #[tokio::test]
    async fn resolve_empty_url_is_bad_request() {
        let (app, extractor) = app(mixed_info(), None);
        let response = app
            .oneshot(post_json(r#"{"url": "", "format": "video"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Video URL is required");
        assert_eq!(extractor.fetches(), 0);
    }

    #[tokio::test]
    async fn resolve_unrecognized_url_is_bad_request() {
        let (app, _) = app(mixed_info(), None);
        let response = app
            .oneshot(post_json(r#"{"url": "not-a-url", "format": "video"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Invalid video URL");
    }

    #[tokio::test]
    async fn resolve_collaborator_failure_is_internal_error() {
        let (app, _) = app(FakeExtractor::default(), None);
        let body = json!({ "url": "https://example.com/watch?v=abc", "format": "video" });
        let response = app.oneshot(post_json(&body.to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let parsed = json_body(response).await;
        assert_eq!(parsed["error"], "Failed to fetch video information");
        assert!(parsed.get("videoDetails").is_none());
    }

    #[tokio::test]
    async fn resolve_malformed_body_is_bad_request() {
        let (app, extractor) = app(mixed_info(), None);
        let response = app.oneshot(post_json("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], BODY_INVALID);
        assert_eq!(extractor.fetches(), 0);
    }

    #[tokio::test]
    async fn resolve_non_string_format_returns_details_without_formats() {
        let (app, extractor) = app(mixed_info(), None);
        let response = app
            .oneshot(post_json(
                r#"{"url": "https://example.com/watch?v=abc", "format": 5}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let parsed = json_body(response).await;
        assert_eq!(parsed["videoDetails"]["title"], "Alpha Title");
        assert_eq!(parsed["formats"], json!([]));
        assert_eq!(extractor.fetches(), 1);
    }

    #[tokio::test]
    async fn resolve_accepts_body_without_json_content_type() {
        let (app, _) = app(mixed_info(), None);
        let request = Request::post("/api/download")
            .body(Body::from(
                r#"{"url": "https://example.com/watch?v=abc", "format": "video"}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let parsed = json_body(response).await;
        assert_eq!(parsed["formats"][0]["itag"], "22");
    }

    #[tokio::test]
    async fn resolve_non_string_url_is_invalid() {
        let (app, extractor) = app(mixed_info(), None);
        let response = app
            .oneshot(post_json(r#"{"url": 42, "format": "video"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Invalid video URL");
        assert_eq!(extractor.fetches(), 0);
    }

    #[tokio::test]
    async fn relay_missing_itag_writes_no_media() {
        let (app, extractor) = app(FakeExtractor::streaming(vec!["media"]), None);
        let response = app
            .oneshot(get("/api/download?url=https%3A%2F%2Fexample.com%2Fwatch%3Fv%3Dabc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "URL and itag are required"
        );
        assert_eq!(extractor.opens(), 0);
    }

    #[tokio::test]
    async fn relay_streams_requested_format() {
        let (app, extractor) = app(FakeExtractor::streaming(vec!["chunk-1;", "chunk-2"]), None);
        let response = app
            .oneshot(get(
                "/api/download?url=https%3A%2F%2Fexample.com%2Fwatch%3Fv%3Dabc&itag=251&filename=Alpha_Title.webm",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"Alpha_Title.webm\""
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"chunk-1;chunk-2");
        assert_eq!(
            extractor.opened.lock().unwrap()[0],
            (
                "https://example.com/watch?v=abc".to_string(),
                "251".to_string()
            )
        );
    }

    #[tokio::test]
    async fn unknown_api_route_is_json_not_found() {
        let (app, _) = app(FakeExtractor::default(), None);
        let response = app.oneshot(get("/api/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "endpoint not found");
    }

    #[tokio::test]
    async fn static_files_need_a_www_root() {
        let (app, _) = app(FakeExtractor::default(), None);
        let response = app.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_root_serves_index_and_assets() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>vidgrab</h1>").unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();
        let (app, _) = app(FakeExtractor::default(), Some(dir.path().to_path_buf()));

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"<h1>vidgrab</h1>");

        let response = app.clone().oneshot(get("/app.css")).await.unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css"
        );

        let response = app.clone().oneshot(get("/some/route")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/missing.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn resolve_www_path_rejects_traversal() {
        let root = Path::new("/srv/www");
        assert!(resolve_www_path(root, "/../etc/passwd").is_err());
        assert!(resolve_www_path(root, "/assets/./app.js").is_ok());
        assert_eq!(
            resolve_www_path(root, "/").unwrap(),
            PathBuf::from("/srv/www/index.html")
        );
    }
}
