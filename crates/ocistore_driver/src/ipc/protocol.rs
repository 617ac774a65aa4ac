//! Wire types exchanged between [`super::client::IpcDriver`] and
//! [`super::server::serve`]. Each message is one line of `serde_json`
//! followed by `\n`; bodies travel as base64 inside the JSON envelope
//! rather than as a separate framed byte stream, trading some throughput
//! for a protocol simple enough to debug with `nc`.

use serde::{Deserialize, Serialize};

use crate::{FileInfo, UrlMethod};

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub op: Op,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Op {
    GetContent { path: String },
    PutContent { path: String, content_b64: String },
    Stat { path: String },
    List { path: String },
    MoveTo { src: String, dst: String },
    Delete { path: String },
    UrlFor { path: String, method: UrlMethod, expiry_secs: u64 },
    WriterOpen { path: String, append: bool },
    WriterWrite { writer_id: u64, data_b64: String },
    WriterClose { writer_id: u64 },
    WriterCommit { writer_id: u64, size_hint: Option<u64> },
    WriterCancel { writer_id: u64 },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: RpcResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum RpcResult {
    Content { content_b64: String },
    Ok,
    Stat(WireFileInfo),
    List(Vec<String>),
    Url(String),
    WriterOpened { writer_id: u64 },
    WriterSize { size: u64 },
    Err(WireError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireFileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time_unix_ms: u64,
    pub is_dir: bool,
}

impl From<FileInfo> for WireFileInfo {
    fn from(info: FileInfo) -> Self {
        let mod_time_unix_ms = info
            .mod_time
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            path: info.path,
            size: info.size,
            mod_time_unix_ms,
            is_dir: info.is_dir,
        }
    }
}

impl From<WireFileInfo> for FileInfo {
    fn from(wire: WireFileInfo) -> Self {
        Self {
            path: wire.path,
            size: wire.size,
            mod_time: std::time::UNIX_EPOCH
                + std::time::Duration::from_millis(wire.mod_time_unix_ms),
            is_dir: wire.is_dir,
        }
    }
}

/// A serializable mirror of [`ocistore_core::errors::Error`]'s public
/// surface. Error variants don't round-trip as the original enum (detail
/// maps and the `&'static str` state name don't survive a process
/// boundary cleanly); callers see a [`ocistore_core::errors::Error::Transport`]
/// carrying this message and code instead.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl From<&ocistore_core::errors::Error> for WireError {
    fn from(err: &ocistore_core::errors::Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
