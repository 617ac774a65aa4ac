//! # ocistore-http
//!
//! The distribution-spec HTTP routing surface over [`ocistore_storage`],
//! treated as a thin translation from HTTP verbs to the core API. Every
//! handler validates its path parameters, delegates
//! to [`ocistore_storage::BlobService`] or
//! [`ocistore_storage::UploadSessionManager`], and maps the shared
//! [`ocistore_core::errors::Error`] taxonomy onto the wire error body.
//!
//! ## Example `main.rs`
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use ocistore_http::{build_router, AppState};
//! use ocistore_storage::{BlobService, UploadSessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let driver = /* ocistore_driver::factory::Registry::create(...) */;
//!     let blobs = Arc::new(BlobService::new(driver.clone(), false));
//!     let sessions = Arc::new(UploadSessionManager::new(driver, blobs.clone(), ttl));
//!     let router = build_router(Arc::new(AppState { blobs, sessions }));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use ocistore_storage::{BlobService, UploadSessionManager};

mod blobs;
pub mod errors;
pub mod headers;
mod manifests;
mod tags;

/// Shared state every handler is given via axum's `State` extractor.
pub struct AppState {
    pub blobs: Arc<BlobService>,
    pub sessions: Arc<UploadSessionManager>,
}

/// `GET /v2/` — liveness & auth check; 200 on success. Authentication
/// challenges are out of core scope here; this always reports success,
/// leaving `WWW-Authenticate` issuance to a layer composed in front of
/// this router.
async fn index_v2() -> StatusCode {
    StatusCode::OK
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v2/", get(index_v2))
        .route("/v2/:name/tags/list", get(tags::list_tags))
        .route(
            "/v2/:name/manifests/:reference",
            get(manifests::get_manifest)
                .put(manifests::put_manifest)
                .delete(manifests::delete_manifest),
        )
        .route(
            "/v2/:name/blobs/:digest",
            get(blobs::get_blob).head(blobs::head_blob),
        )
        .route("/v2/:name/blobs/uploads/", post(blobs::uploads_post))
        .route(
            "/v2/:name/blobs/uploads/:uuid",
            get(blobs::uploads_status)
                .head(blobs::uploads_status)
                .patch(blobs::uploads_patch)
                .put(blobs::uploads_put)
                .delete(blobs::uploads_delete),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use ocistore_driver::filesystem::FilesystemDriver;
    use ocistore_driver::Driver;
    use ocistore_storage::{BlobService, UploadSessionManager};

    use super::*;

    #[tokio::test]
    async fn index_reports_liveness() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let blobs = Arc::new(BlobService::new(driver.clone(), false));
        let sessions = Arc::new(UploadSessionManager::new(driver, blobs.clone(), Duration::from_secs(3600)));
        let app = build_router(Arc::new(AppState { blobs, sessions }));

        let response = app
            .oneshot(Request::get("/v2/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn manifests_report_unsupported_after_validating_the_path() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        let blobs = Arc::new(BlobService::new(driver.clone(), false));
        let sessions = Arc::new(UploadSessionManager::new(driver, blobs.clone(), Duration::from_secs(3600)));
        let app = build_router(Arc::new(AppState { blobs, sessions }));

        let response = app
            .clone()
            .oneshot(
                Request::get("/v2/library/nginx/manifests/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = app
            .oneshot(
                Request::get("/v2/Library/manifests/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
