//! The subprocess side of the IPC transport: accepts connections on a Unix
//! domain socket and dispatches each [`Request`] against a wrapped
//! [`Driver`], one open writer per `writer_id` tracked in a local table.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use ocistore_core::errors::Error;

use super::protocol::{Op, Request, Response, RpcResult, WireError};
use crate::{Driver, UrlForOptions, Writer};

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn from_b64(s: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(Error::transport)
}

/// Runs forever, accepting one connection at a time on `socket_path`.
/// This transport is single-client: a production deployment spawns one
/// subprocess per logical driver instance, not a shared pool.
pub async fn serve(driver: Arc<dyn Driver>, socket_path: &str) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    loop {
        let (stream, _) = listener.accept().await?;
        let driver = driver.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, driver).await {
                tracing::warn!(%err, "ipc connection ended with an error");
            }
        });
    }
}

async fn handle_connection(
    stream: UnixStream,
    driver: Arc<dyn Driver>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let writers: Mutex<HashMap<u64, Box<dyn Writer>>> = Mutex::new(HashMap::new());
    let mut next_writer_id: u64 = 1;

    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(());
        }
        let request: Request = match serde_json::from_str(line.trim_end()) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(%err, "ipc request failed to parse");
                continue;
            }
        };

        let response = dispatch(&driver, &writers, &mut next_writer_id, request).await;
        let mut encoded = serde_json::to_string(&response).expect("Response is always serializable");
        encoded.push('\n');
        write_half.write_all(encoded.as_bytes()).await?;
    }
}

async fn dispatch(
    driver: &Arc<dyn Driver>,
    writers: &Mutex<HashMap<u64, Box<dyn Writer>>>,
    next_writer_id: &mut u64,
    request: Request,
) -> Response {
    let id = request.id;
    let result = run_op(driver, writers, next_writer_id, request.op).await;
    let result = match result {
        Ok(r) => r,
        Err(e) => RpcResult::Err(WireError::from(&e)),
    };
    Response { id, result }
}

async fn run_op(
    driver: &Arc<dyn Driver>,
    writers: &Mutex<HashMap<u64, Box<dyn Writer>>>,
    next_writer_id: &mut u64,
    op: Op,
) -> Result<RpcResult, Error> {
    match op {
        Op::GetContent { path } => {
            let content = driver.get_content(&path).await?;
            Ok(RpcResult::Content {
                content_b64: b64(&content),
            })
        }
        Op::PutContent { path, content_b64 } => {
            let content = from_b64(&content_b64)?;
            driver.put_content(&path, content.into()).await?;
            Ok(RpcResult::Ok)
        }
        Op::Stat { path } => {
            let info = driver.stat(&path).await?;
            Ok(RpcResult::Stat(info.into()))
        }
        Op::List { path } => Ok(RpcResult::List(driver.list(&path).await?)),
        Op::MoveTo { src, dst } => {
            driver.move_to(&src, &dst).await?;
            Ok(RpcResult::Ok)
        }
        Op::Delete { path } => {
            driver.delete(&path).await?;
            Ok(RpcResult::Ok)
        }
        Op::UrlFor {
            path,
            method,
            expiry_secs,
        } => {
            let opts = UrlForOptions {
                method,
                expiry: std::time::Duration::from_secs(expiry_secs),
            };
            Ok(RpcResult::Url(driver.url_for(&path, &opts).await?))
        }
        Op::WriterOpen { path, append } => {
            let writer = driver.writer(&path, append).await?;
            let writer_id = *next_writer_id;
            *next_writer_id += 1;
            writers.lock().await.insert(writer_id, writer);
            Ok(RpcResult::WriterOpened { writer_id })
        }
        Op::WriterWrite { writer_id, data_b64 } => {
            let data = from_b64(&data_b64)?;
            let mut guard = writers.lock().await;
            let writer = guard
                .get_mut(&writer_id)
                .ok_or_else(|| Error::invalid_path(format!("writer_id={writer_id}")))?;
            writer.write(data.into()).await?;
            Ok(RpcResult::WriterSize { size: writer.size() })
        }
        Op::WriterClose { writer_id } => {
            let mut guard = writers.lock().await;
            let writer = guard
                .get_mut(&writer_id)
                .ok_or_else(|| Error::invalid_path(format!("writer_id={writer_id}")))?;
            writer.close().await?;
            Ok(RpcResult::Ok)
        }
        Op::WriterCommit { writer_id, size_hint } => {
            let mut guard = writers.lock().await;
            let writer = guard
                .remove(&writer_id)
                .ok_or_else(|| Error::invalid_path(format!("writer_id={writer_id}")))?;
            let mut writer = writer;
            writer.commit(size_hint).await?;
            Ok(RpcResult::Ok)
        }
        Op::WriterCancel { writer_id } => {
            let mut guard = writers.lock().await;
            let writer = guard
                .remove(&writer_id)
                .ok_or_else(|| Error::invalid_path(format!("writer_id={writer_id}")))?;
            let mut writer = writer;
            writer.cancel().await?;
            Ok(RpcResult::Ok)
        }
    }
}
