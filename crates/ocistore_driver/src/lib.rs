//! # ocistore-driver
//!
//! The storage-driver contract and the backends that satisfy it: the
//! local filesystem, WebHDFS, and the S3-family of multipart-upload
//! backends covering S3, QingStor, and the Azure block-blob variant.
//! Also provides the path-validating wrapper, the driver factory and
//! self-check, the cross-driver writer abstraction, and an optional IPC
//! subprocess transport.
//!
//! Every backend implements exactly the [`Driver`] trait; higher layers
//! (`ocistore_storage`) see nothing else — this is the core abstraction
//! every backend exposes exactly this set of operations against.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub use ocistore_core::errors::{Detail, Error, Result};

pub mod config;
pub mod factory;
pub mod filesystem;
pub mod ipc;
pub mod s3;
pub mod validate;
pub mod webhdfs;
pub mod writer;

pub use factory::{ConfigFactory, DriverFactory, Registry};
pub use validate::PathValidatingDriver;
pub use writer::Writer;

/// `(path, size, mod_time, is_dir)`, returned by `Stat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: SystemTime,
    pub is_dir: bool,
}

/// HTTP verb a signed URL returned by `url_for` is valid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlMethod {
    Get,
    Head,
}

#[derive(Clone, Debug)]
pub struct UrlForOptions {
    pub method: UrlMethod,
    pub expiry: Duration,
}

impl Default for UrlForOptions {
    /// Expiry defaults to 20 minutes if unspecified.
    fn default() -> Self {
        Self {
            method: UrlMethod::Get,
            expiry: Duration::from_secs(20 * 60),
        }
    }
}

/// Returned from a [`Driver::walk`] visitor to prune traversal: a visitor
/// may return `SkipDir` to prune the subtree rooted at the current path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    SkipDir,
}

/// A boxed reader closeable by the caller.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// The polymorphic byte-store interface every backend satisfies.
///
/// Paths handed to driver methods have already been validated by
/// [`PathValidatingDriver`] — implementors MUST NOT attempt to "clean"
/// them beyond joining a configured root prefix.
#[async_trait]
pub trait Driver: Send + Sync + fmt::Debug + 'static {
    async fn get_content(&self, path: &str) -> Result<Bytes>;

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()>;

    async fn reader(&self, path: &str, offset: u64) -> Result<BoxReader>;

    /// `append` selects append-mode (`Writer` must fail with
    /// `PathNotFound` if absent) vs. fresh/truncating mode.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn Writer>>;

    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Immediate children of `path`. Sorted order is not required;
    /// uniqueness is.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    async fn move_to(&self, src: &str, dst: &str) -> Result<()>;

    /// Recursive delete.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn url_for(&self, path: &str, opts: &UrlForOptions) -> Result<String>;

    /// Default implementation walks via repeated [`Driver::list`] +
    /// [`Driver::stat`] calls, which is correct for every backend even
    /// though it is not the most efficient traversal a given backend could
    /// offer (a backend with a native recursive-listing API may override
    /// this).
    async fn walk(
        &self,
        root: &str,
        visitor: &mut (dyn FnMut(&FileInfo) -> Result<WalkAction> + Send),
    ) -> Result<()> {
        default_walk(self, root, visitor).await
    }
}

fn default_walk<'a, D: Driver + ?Sized>(
    driver: &'a D,
    root: &'a str,
    visitor: &'a mut (dyn FnMut(&FileInfo) -> Result<WalkAction> + Send),
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let info = driver.stat(root).await?;
        match visitor(&info)? {
            WalkAction::SkipDir => return Ok(()),
            WalkAction::Continue => {}
        }
        if !info.is_dir {
            return Ok(());
        }
        for child in driver.list(root).await? {
            default_walk(driver, &child, visitor).await?;
        }
        Ok(())
    })
}
