//! The driver-agnostic error taxonomy shared across the workspace.
//!
//! Every layer of the workspace (drivers, the blob service, the upload
//! session manager, the HTTP translation layer) converts its own errors
//! into one of these kinds before it crosses a crate boundary, so that a
//! caller several layers up can still make a structural decision (retry?
//! 404? 416?) without downcasting a opaque error type.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Arbitrary extra context carried alongside an [`Error`], e.g. `{"digest": "sha256:..."}`.
pub type Detail = HashMap<String, String>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("path not found: {path}")]
    PathNotFound { path: String, detail: Detail },

    #[error("invalid path: {path}")]
    InvalidPath { path: String, detail: Detail },

    #[error("invalid offset {offset} for {path}")]
    InvalidOffset {
        path: String,
        offset: u64,
        detail: Detail,
    },

    #[error("digest invalid: {digest}")]
    DigestInvalid { digest: String, detail: Detail },

    #[error("unsupported digest algorithm: {algo}")]
    DigestUnsupported { algo: String, detail: Detail },

    #[error("driver cannot satisfy this request")]
    UnsupportedMethod { detail: Detail },

    #[error("transport failure: {cause}")]
    Transport { cause: String, detail: Detail },

    #[error("repository name unknown")]
    NameUnknown { detail: Detail },
    #[error("manifest unknown")]
    ManifestUnknown { detail: Detail },
    #[error("blob unknown")]
    BlobUnknown { detail: Detail },
    #[error("blob upload unknown")]
    BlobUploadUnknown { detail: Detail },

    #[error("repository name invalid")]
    NameInvalid { detail: Detail },
    #[error("tag invalid")]
    TagInvalid { detail: Detail },
    #[error("manifest invalid")]
    ManifestInvalid { detail: Detail },
    #[error("manifest unverified")]
    ManifestUnverified { detail: Detail },

    #[error("unauthorized")]
    Unauthorized { detail: Detail },

    /// Raised by the Writer state machine when a caller writes, closes,
    /// commits, or cancels a writer outside the state that permits it.
    #[error("writer already {state}")]
    WriterClosed { state: &'static str, detail: Detail },
}

impl Error {
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Error::PathNotFound {
            path: path.into(),
            detail: Detail::new(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            detail: Detail::new(),
        }
    }

    pub fn invalid_offset(path: impl Into<String>, offset: u64) -> Self {
        Error::InvalidOffset {
            path: path.into(),
            offset,
            detail: Detail::new(),
        }
    }

    pub fn digest_invalid(digest: impl Into<String>) -> Self {
        Error::DigestInvalid {
            digest: digest.into(),
            detail: Detail::new(),
        }
    }

    pub fn digest_unsupported(algo: impl Into<String>) -> Self {
        Error::DigestUnsupported {
            algo: algo.into(),
            detail: Detail::new(),
        }
    }

    pub fn writer_closed(state: &'static str) -> Self {
        Error::WriterClosed {
            state,
            detail: Detail::new(),
        }
    }

    pub fn unsupported_method() -> Self {
        Error::UnsupportedMethod {
            detail: Detail::new(),
        }
    }

    pub fn transport(cause: impl fmt::Display) -> Self {
        Error::Transport {
            cause: cause.to_string(),
            detail: Detail::new(),
        }
    }

    /// Attach a key/value to this error's detail map, builder-style.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail_mut().insert(key.into(), value.into());
        self
    }

    fn detail_mut(&mut self) -> &mut Detail {
        match self {
            Error::PathNotFound { detail, .. }
            | Error::InvalidPath { detail, .. }
            | Error::InvalidOffset { detail, .. }
            | Error::DigestInvalid { detail, .. }
            | Error::DigestUnsupported { detail, .. }
            | Error::UnsupportedMethod { detail }
            | Error::Transport { detail, .. }
            | Error::NameUnknown { detail }
            | Error::ManifestUnknown { detail }
            | Error::BlobUnknown { detail }
            | Error::BlobUploadUnknown { detail }
            | Error::NameInvalid { detail }
            | Error::TagInvalid { detail }
            | Error::ManifestInvalid { detail }
            | Error::ManifestUnverified { detail }
            | Error::Unauthorized { detail }
            | Error::WriterClosed { detail, .. } => detail,
        }
    }

    /// Whether the Blob Service / Upload Session Manager should retry this
    /// error with bounded exponential back-off: eventual-consistency
    /// `PathNotFound` right after a move, and transient transport failures
    /// on otherwise-idempotent operations.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PathNotFound { .. } | Error::Transport { .. })
    }

    /// The HTTP status this error kind maps to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::PathNotFound { .. } => 404,
            Error::InvalidPath { .. } => 400,
            Error::InvalidOffset { .. } => 416,
            Error::DigestInvalid { .. } => 400,
            Error::DigestUnsupported { .. } => 400,
            Error::UnsupportedMethod { .. } => 405,
            Error::Transport { .. } => 500,
            Error::NameUnknown { .. }
            | Error::ManifestUnknown { .. }
            | Error::BlobUnknown { .. }
            | Error::BlobUploadUnknown { .. } => 404,
            Error::NameInvalid { .. }
            | Error::TagInvalid { .. }
            | Error::ManifestInvalid { .. }
            | Error::ManifestUnverified { .. } => 400,
            Error::Unauthorized { .. } => 401,
            Error::WriterClosed { .. } => 409,
        }
    }

    /// Stable uppercase code suitable for the distribution-spec
    /// `{"errors": [{"code": ...}]}` error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::PathNotFound { .. } => "PATH_NOT_FOUND",
            Error::InvalidPath { .. } => "INVALID_PATH",
            Error::InvalidOffset { .. } => "INVALID_OFFSET",
            Error::DigestInvalid { .. } => "DIGEST_INVALID",
            Error::DigestUnsupported { .. } => "DIGEST_UNSUPPORTED",
            Error::UnsupportedMethod { .. } => "UNSUPPORTED",
            Error::Transport { .. } => "TRANSPORT_ERROR",
            Error::NameUnknown { .. } => "NAME_UNKNOWN",
            Error::ManifestUnknown { .. } => "MANIFEST_UNKNOWN",
            Error::BlobUnknown { .. } => "BLOB_UNKNOWN",
            Error::BlobUploadUnknown { .. } => "BLOB_UPLOAD_UNKNOWN",
            Error::NameInvalid { .. } => "NAME_INVALID",
            Error::TagInvalid { .. } => "TAG_INVALID",
            Error::ManifestInvalid { .. } => "MANIFEST_INVALID",
            Error::ManifestUnverified { .. } => "MANIFEST_UNVERIFIED",
            Error::Unauthorized { .. } => "UNAUTHORIZED",
            Error::WriterClosed { .. } => "WRITER_CLOSED",
        }
    }
}
