//! `GET|HEAD|POST|PATCH|PUT|DELETE /v2/<name>/blobs/...`.
//!
//! A thin translation from HTTP verbs to [`ocistore_storage`]'s core API.

use std::io::Cursor;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RANGE};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use ocistore_core::digest::Digest;
use ocistore_core::path::RepositoryName;

use crate::errors::{Error, Result};
use crate::headers::{render_range, ContentRange};
use crate::AppState;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";
const DOCKER_UPLOAD_UUID: &str = "Docker-Upload-UUID";

fn repo(name: &str) -> Result<RepositoryName> {
    RepositoryName::try_from(name).map_err(Error::Core)
}

fn digest(raw: &str) -> Result<Digest> {
    Digest::try_from(raw).map_err(Error::Core)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::MalformedUuid)
}

pub async fn get_blob(
    State(state): State<Arc<AppState>>,
    Path((_name, raw_digest)): Path<(String, String)>,
) -> Result<Response> {
    let digest = digest(&raw_digest)?;
    let info = state.blobs.stat(&digest).await?;
    let reader = state.blobs.get(&digest).await?;
    let stream = ReaderStream::new(reader);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_LENGTH, info.size)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::from_stream(stream))
        .expect("response with a validated header set always builds"))
}

pub async fn head_blob(
    State(state): State<Arc<AppState>>,
    Path((_name, raw_digest)): Path<(String, String)>,
) -> Result<Response> {
    let digest = digest(&raw_digest)?;
    let info = state.blobs.stat(&digest).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_LENGTH, info.size)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

#[derive(Debug, Deserialize)]
pub struct UploadInitQuery {
    digest: Option<String>,
}

/// Optional query `?digest=<digest>` completes the upload in one request
/// (monolithic). Otherwise opens a resumable session.
pub async fn uploads_post(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<UploadInitQuery>,
    body: Bytes,
) -> Result<Response> {
    let name = repo(&name)?;

    if let Some(raw_digest) = query.digest {
        let digest = digest(&raw_digest)?;
        state.blobs.put(&digest, Cursor::new(body.to_vec())).await?;

        return Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header(LOCATION, format!("/v2/{}/blobs/{}", name.as_str(), digest))
            .header(DOCKER_CONTENT_DIGEST, digest.to_string())
            .body(Body::empty())
            .expect("response with a validated header set always builds"));
    }

    let uuid = state.sessions.initiate(&name).await?;
    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(LOCATION, format!("/v2/{}/blobs/uploads/{}", name.as_str(), uuid))
        .header(RANGE, render_range(0))
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_UPLOAD_UUID, uuid.to_string())
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

pub async fn uploads_status(
    State(state): State<Arc<AppState>>,
    Path((_name, raw_uuid)): Path<(String, String)>,
) -> Result<Response> {
    let uuid = parse_uuid(&raw_uuid)?;
    let bytes_received = state.sessions.status(&uuid).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(RANGE, render_range(bytes_received))
        .header(DOCKER_UPLOAD_UUID, uuid.to_string())
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

/// Requires `Content-Range: <start>-<end-inclusive>`. 204 on success with
/// an updated `Range`.
pub async fn uploads_patch(
    State(state): State<Arc<AppState>>,
    Path((_name, raw_uuid)): Path<(String, String)>,
    request: axum::extract::Request,
) -> Result<Response> {
    let uuid = parse_uuid(&raw_uuid)?;
    let content_range = ContentRange::from_headers(request.headers())?;

    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| Error::Core(ocistore_core::errors::Error::transport(e)))?;

    let bytes_received = state.sessions.append(&uuid, content_range.start, body).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(RANGE, render_range(bytes_received))
        .header(DOCKER_UPLOAD_UUID, uuid.to_string())
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

#[derive(Debug, Deserialize)]
pub struct UploadCommitQuery {
    digest: String,
}

/// Commits the upload; an optional trailing body is the final chunk.
pub async fn uploads_put(
    State(state): State<Arc<AppState>>,
    Path((name, raw_uuid)): Path<(String, String)>,
    Query(query): Query<UploadCommitQuery>,
    body: Bytes,
) -> Result<Response> {
    let uuid = parse_uuid(&raw_uuid)?;
    let digest = digest(&query.digest)?;
    let trailing = if body.is_empty() { None } else { Some(body) };

    state.sessions.commit(&uuid, &digest, trailing).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(LOCATION, format!("/v2/{}/blobs/{}", name, digest))
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .header(CONTENT_LENGTH, 0)
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

pub async fn uploads_delete(
    State(state): State<Arc<AppState>>,
    Path((_name, raw_uuid)): Path<(String, String)>,
) -> Result<Response> {
    let uuid = parse_uuid(&raw_uuid)?;
    state.sessions.cancel(&uuid).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("response with a validated header set always builds"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use ocistore_driver::filesystem::FilesystemDriver;
    use ocistore_driver::Driver;
    use ocistore_storage::{BlobService, UploadSessionManager};

    use crate::{build_router, AppState};

    fn app(root: &std::path::Path) -> axum::Router {
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(root.to_path_buf()));
        let blobs = Arc::new(BlobService::new(driver.clone(), true));
        let sessions = Arc::new(UploadSessionManager::new(driver, blobs.clone(), Duration::from_secs(3600)));
        build_router(Arc::new(AppState { blobs, sessions }))
    }

    #[tokio::test]
    async fn monolithic_upload_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path());

        let digest = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/v2/library/nginx/blobs/uploads/?digest={digest}"))
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::get(format!("/v2/library/nginx/blobs/{digest}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn resumable_two_chunk_upload_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let app = app(tmp.path());

        let response = app
            .clone()
            .oneshot(
                Request::post("/v2/library/nginx/blobs/uploads/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let location = response
            .headers()
            .get(axum::http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(
                Request::patch(&location)
                    .header("content-range", "0-4")
                    .body(Body::from("abcde"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::patch(&location)
                    .header("content-range", "5-9")
                    .body(Body::from("fghij"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let digest = "sha256:72399361da6a7754fec986dca5b7cbaf1c810a28ded4abaf56b2106d06cb78b0";
        let response = app
            .oneshot(
                Request::put(format!("{location}?digest={digest}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
