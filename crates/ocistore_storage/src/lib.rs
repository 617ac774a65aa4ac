//! # ocistore-storage
//!
//! The two server-side components that sit directly on top of a
//! [`ocistore_driver::Driver`]: the Upload Session Manager and the
//! content-addressed Blob Service.
//!
//! Everything here is driver-agnostic — a single `Arc<dyn Driver>` is
//! shared between [`BlobService`] and [`UploadSessionManager`], and neither
//! one knows or cares whether it is backed by the filesystem driver, S3, or
//! WebHDFS.

pub mod config;
pub mod hashstate;

mod blobs;
mod session;
mod sessions;

pub use blobs::BlobService;
pub use config::BlobServiceConfig;
pub use session::UploadSession;
pub use sessions::UploadSessionManager;

pub use ocistore_core::errors::{Detail, Error, Result};
