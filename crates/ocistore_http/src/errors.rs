//! Translates [`ocistore_core::errors::Error`] into the distribution-spec
//! error body: `{"errors": [{"code", "message", "detail"}]}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error as ThisError;

use ocistore_core::errors::Error as CoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Wraps [`CoreError`] plus the request-parsing failures that never reach
/// the core taxonomy (missing headers/query parameters, malformed UUIDs).
#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("missing required query parameter: {0}")]
    MissingQueryParameter(&'static str),

    #[error("malformed upload uuid")]
    MalformedUuid,

    #[error("malformed Content-Range header")]
    MalformedContentRange,
}

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct ErrorEntry {
    code: String,
    message: String,
    detail: serde_json::Value,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, code, detail) = match self {
            Error::Core(e) => {
                let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let code = e.code().to_string();
                let detail = match &e {
                    CoreError::PathNotFound { detail, .. }
                    | CoreError::InvalidPath { detail, .. }
                    | CoreError::InvalidOffset { detail, .. }
                    | CoreError::DigestInvalid { detail, .. }
                    | CoreError::DigestUnsupported { detail, .. }
                    | CoreError::UnsupportedMethod { detail }
                    | CoreError::Transport { detail, .. }
                    | CoreError::NameUnknown { detail }
                    | CoreError::ManifestUnknown { detail }
                    | CoreError::BlobUnknown { detail }
                    | CoreError::BlobUploadUnknown { detail }
                    | CoreError::NameInvalid { detail }
                    | CoreError::TagInvalid { detail }
                    | CoreError::ManifestInvalid { detail }
                    | CoreError::ManifestUnverified { detail }
                    | CoreError::Unauthorized { detail }
                    | CoreError::WriterClosed { detail, .. } => {
                        serde_json::to_value(detail).unwrap_or(serde_json::Value::Null)
                    }
                };
                (status, code, detail)
            }
            Error::MissingHeader(_) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                serde_json::Value::Null,
            ),
            Error::MissingQueryParameter(_) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST".to_string(),
                serde_json::Value::Null,
            ),
            Error::MalformedUuid => (
                StatusCode::BAD_REQUEST,
                "BLOB_UPLOAD_UNKNOWN".to_string(),
                serde_json::Value::Null,
            ),
            Error::MalformedContentRange => (
                StatusCode::REQUESTED_RANGE_NOT_SATISFIABLE,
                "INVALID_OFFSET".to_string(),
                serde_json::Value::Null,
            ),
        };

        let body = ErrorBody {
            errors: vec![ErrorEntry { code, message, detail }],
        };
        (status, Json(body)).into_response()
    }
}
