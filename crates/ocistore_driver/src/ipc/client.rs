//! The parent-process side of the IPC transport: spawns the driver
//! subprocess, dials its Unix socket, and implements [`Driver`] by
//! round-tripping [`Request`]/[`Response`] pairs over it.
//!
//! The connection is request/response, one in flight at a time — a single
//! `tokio::sync::Mutex` around the socket halves serializes callers rather
//! than multiplexing by request id, which keeps this transport simple at
//! the cost of not pipelining concurrent requests from the same
//! [`IpcDriver`] handle.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use ocistore_core::errors::{Error, Result};

use super::protocol::{Op, Request, Response, RpcResult};
use crate::writer::{require_state, WriterState};
use crate::{BoxReader, Driver, FileInfo, UrlForOptions, UrlMethod, Writer};

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn from_b64(s: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(Error::transport)
}

struct Connection {
    read: BufReader<OwnedReadHalf>,
    write: OwnedWriteHalf,
}

/// The request/response half of the transport, held by both `IpcDriver`
/// and every [`IpcWriter`] it hands out so a writer can keep talking to
/// the subprocess without borrowing the driver itself.
struct Shared {
    conn: Mutex<Connection>,
    next_id: AtomicU64,
}

impl Shared {
    async fn roundtrip(&self, op: Op) -> Result<RpcResult> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request { id, op };
        let mut line = serde_json::to_string(&request).map_err(Error::transport)?;
        line.push('\n');

        let mut conn = self.conn.lock().await;
        conn.write
            .write_all(line.as_bytes())
            .await
            .map_err(Error::transport)?;

        let mut response_line = String::new();
        conn.read
            .read_line(&mut response_line)
            .await
            .map_err(Error::transport)?;
        if response_line.is_empty() {
            return Err(Error::transport("ipc driver subprocess closed the connection"));
        }
        let response: Response =
            serde_json::from_str(response_line.trim_end()).map_err(Error::transport)?;

        match response.result {
            RpcResult::Err(wire) => Err(Error::transport(wire.message).with_detail("remote_code", wire.code)),
            other => Ok(other),
        }
    }
}

/// Drives a driver subprocess over a Unix domain socket.
pub struct IpcDriver {
    child: Mutex<Child>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for IpcDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcDriver").finish_non_exhaustive()
    }
}

impl IpcDriver {
    /// Spawns `command` (expected to call [`super::server::serve`] on
    /// `socket_path`) and connects to it, retrying briefly while the
    /// child process creates its socket file.
    pub async fn spawn(mut command: Command, socket_path: &str) -> Result<Self> {
        command.stdin(Stdio::null());
        let child = command.spawn().map_err(Error::transport)?;

        let mut last_err = None;
        let mut delay = Duration::from_millis(10);
        for _ in 0..10 {
            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    return Ok(Self {
                        child: Mutex::new(child),
                        shared: Arc::new(Shared {
                            conn: Mutex::new(Connection {
                                read: BufReader::new(read),
                                write,
                            }),
                            next_id: AtomicU64::new(1),
                        }),
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_millis(500));
                }
            }
        }
        Err(Error::transport(format!(
            "could not connect to ipc driver socket: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn roundtrip(&self, op: Op) -> Result<RpcResult> {
        self.shared.roundtrip(op).await
    }
}

#[async_trait]
impl Driver for IpcDriver {
    async fn get_content(&self, path: &str) -> Result<Bytes> {
        match self
            .roundtrip(Op::GetContent { path: path.to_string() })
            .await?
        {
            RpcResult::Content { content_b64 } => Ok(Bytes::from(from_b64(&content_b64)?)),
            _ => Err(Error::transport("unexpected ipc response for get_content")),
        }
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        self.roundtrip(Op::PutContent {
            path: path.to_string(),
            content_b64: b64(&content),
        })
        .await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<BoxReader> {
        let data = self.get_content(path).await?;
        let sliced = if (offset as usize) < data.len() {
            data.slice((offset as usize)..)
        } else {
            Bytes::new()
        };
        Ok(Box::new(std::io::Cursor::new(sliced.to_vec())))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn Writer>> {
        match self
            .roundtrip(Op::WriterOpen {
                path: path.to_string(),
                append,
            })
            .await?
        {
            RpcResult::WriterOpened { writer_id } => Ok(Box::new(IpcWriter {
                shared: self.shared.clone(),
                writer_id,
                size: 0,
                state: WriterState::Open,
            })),
            _ => Err(Error::transport("unexpected ipc response for writer")),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        match self.roundtrip(Op::Stat { path: path.to_string() }).await? {
            RpcResult::Stat(wire) => Ok(wire.into()),
            _ => Err(Error::transport("unexpected ipc response for stat")),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        match self.roundtrip(Op::List { path: path.to_string() }).await? {
            RpcResult::List(entries) => Ok(entries),
            _ => Err(Error::transport("unexpected ipc response for list")),
        }
    }

    async fn move_to(&self, src: &str, dst: &str) -> Result<()> {
        self.roundtrip(Op::MoveTo {
            src: src.to_string(),
            dst: dst.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.roundtrip(Op::Delete { path: path.to_string() }).await?;
        Ok(())
    }

    async fn url_for(&self, path: &str, opts: &UrlForOptions) -> Result<String> {
        match self
            .roundtrip(Op::UrlFor {
                path: path.to_string(),
                method: opts.method,
                expiry_secs: opts.expiry.as_secs(),
            })
            .await?
        {
            RpcResult::Url(url) => Ok(url),
            _ => Err(Error::transport("unexpected ipc response for url_for")),
        }
    }
}

struct IpcWriter {
    shared: Arc<Shared>,
    writer_id: u64,
    size: u64,
    state: WriterState,
}

#[async_trait]
impl Writer for IpcWriter {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        require_state(self.state, &[WriterState::Open])?;
        let len = data.len();
        match self
            .shared
            .roundtrip(Op::WriterWrite {
                writer_id: self.writer_id,
                data_b64: b64(&data),
            })
            .await?
        {
            RpcResult::WriterSize { size } => self.size = size,
            _ => return Err(Error::transport("unexpected ipc response for writer write")),
        }
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open])?;
        self.shared
            .roundtrip(Op::WriterClose {
                writer_id: self.writer_id,
            })
            .await?;
        self.state = WriterState::Closed;
        Ok(())
    }

    async fn commit(&mut self, size_hint: Option<u64>) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        self.shared
            .roundtrip(Op::WriterCommit {
                writer_id: self.writer_id,
                size_hint,
            })
            .await?;
        self.state = WriterState::Committed;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        self.shared
            .roundtrip(Op::WriterCancel {
                writer_id: self.writer_id,
            })
            .await?;
        self.state = WriterState::Cancelled;
        Ok(())
    }

    fn state(&self) -> WriterState {
        self.state
    }
}
