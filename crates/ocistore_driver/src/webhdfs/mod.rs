//! WebHDFS backend.
//!
//! WebHDFS operations are two-hop: the NameNode answers with a `307
//! Temporary Redirect` pointing at the DataNode that actually serves the
//! bytes, and the client must follow it itself rather than let an HTTP
//! client silently retry the original request against it. `reqwest`'s
//! default redirect policy would replay the original method and body
//! against the DataNode, which happens to work for `GET` but corrupts
//! `PUT`/`POST` bodies on some Hadoop versions, so every write path here
//! builds its client with redirects disabled and resolves the hop by hand.
//!
//! The scope check that gated which paths this driver would serve used to
//! panic on a malformed scope pattern. [`Scope`] now reports
//! [`ocistore_core::Error::InvalidPath`] instead, and `Move`'s
//! retry-until-visible loop — a NameNode rename can race a still-in-flight
//! close — is bounded at [`MOVE_RETRY_LIMIT`] iterations rather than
//! looping forever.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use ocistore_core::errors::{Error, Result};

use crate::writer::{require_state, AppendBuffer, WriterState};
use crate::{BoxReader, Driver, FileInfo, UrlForOptions, Writer};

/// Bounds the `Move` retry-until-visible loop so a stuck NameNode rename
/// fails rather than looping forever.
pub const MOVE_RETRY_LIMIT: usize = 10;

/// Block size an `AppendBuffer`-backed writer flushes at, matching HDFS's
/// own default block granularity.
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Restricts which driver paths a [`WebHdfsDriver`] will serve, so a
/// misconfigured glob fails at construction instead of mid-request.
#[derive(Clone, Debug)]
pub enum Scope {
    Exact(String),
    Prefix(String),
    Glob(regex::Regex),
}

impl Scope {
    pub fn glob(pattern: &str) -> Result<Self> {
        let escaped = regex::escape(pattern).replace("\\*", ".*");
        let re = regex::Regex::new(&format!("^{escaped}$"))
            .map_err(|e| Error::invalid_path(pattern).with_detail("reason", e.to_string()))?;
        Ok(Scope::Glob(re))
    }

    fn allows(&self, path: &str) -> bool {
        match self {
            Scope::Exact(p) => p == path,
            Scope::Prefix(p) => path.starts_with(p.as_str()),
            Scope::Glob(re) => re.is_match(path),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebHdfsConfig {
    pub namenode_url: String,
    pub user_name: String,
    #[serde(default)]
    pub root: String,
}

#[derive(Debug)]
pub struct WebHdfsDriver {
    client: Client,
    namenode_url: String,
    user_name: String,
    root: String,
    scope: Option<Scope>,
}

impl WebHdfsDriver {
    pub fn new(config: WebHdfsConfig, scope: Option<Scope>) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(Error::transport)?;
        Ok(Self {
            client,
            namenode_url: config.namenode_url,
            user_name: config.user_name,
            root: config.root,
            scope,
        })
    }

    fn full_path(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    fn check_scope(&self, path: &str) -> Result<()> {
        match &self.scope {
            Some(scope) if !scope.allows(path) => {
                Err(Error::invalid_path(path).with_detail("reason", "outside configured scope"))
            }
            _ => Ok(()),
        }
    }

    fn namenode_url(&self, path: &str, op: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}/webhdfs/v1{}?op={}&user.name={}",
            self.namenode_url,
            path,
            op,
            self.user_name
        );
        for (k, v) in extra {
            url.push('&');
            url.push_str(k);
            url.push('=');
            url.push_str(v);
        }
        url
    }

    /// Issues `method` against the NameNode, follows the `307` to the
    /// DataNode exactly once, and returns that response.
    async fn two_hop(
        &self,
        method: reqwest::Method,
        namenode_url: String,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let mut req = self.client.request(method.clone(), &namenode_url);
        if let Some(b) = body.clone() {
            req = req.body(b);
        }
        let first = req.send().await.map_err(Error::transport)?;
        if first.status() != StatusCode::TEMPORARY_REDIRECT {
            return self.as_result(first).await;
        }
        let location = first
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::transport("redirect response missing Location header"))?
            .to_string();

        let mut req = self.client.request(method, &location);
        if let Some(b) = body {
            req = req.body(b);
        }
        let second = req.send().await.map_err(Error::transport)?;
        self.as_result(second).await
    }

    async fn as_result(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::path_not_found(resp.url().path())),
            status if status.is_success() => Ok(resp),
            status => {
                let url = resp.url().to_string();
                let body = resp.text().await.unwrap_or_default();
                Err(Error::transport(format!("webhdfs {status}: {body}")).with_detail("url", url))
            }
        }
    }

    /// RENAME/DELETE report outcome twice: the HTTP status and a
    /// `{"boolean": bool}` body. A 200 with `false` means the NameNode
    /// accepted the request but the operation did not take effect (most
    /// often a rename racing a still-in-flight close), which callers must
    /// treat as retryable, not success.
    async fn boolean_op(&self, method: reqwest::Method, namenode_url: String) -> Result<bool> {
        let resp = self.two_hop(method, namenode_url, None).await?;
        let body: BooleanResult = resp.json().await.map_err(Error::transport)?;
        Ok(body.boolean)
    }
}

#[derive(Deserialize)]
struct BooleanResult {
    boolean: bool,
}

#[derive(Deserialize)]
struct FileStatusWrapper {
    #[serde(rename = "FileStatus")]
    file_status: FileStatus,
}

#[derive(Deserialize)]
struct FileStatus {
    length: u64,
    #[serde(rename = "modificationTime")]
    modification_time: u64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ListStatusWrapper {
    #[serde(rename = "FileStatuses")]
    file_statuses: FileStatuses,
}

#[derive(Deserialize)]
struct FileStatuses {
    #[serde(rename = "FileStatus")]
    file_status: Vec<NamedFileStatus>,
}

#[derive(Deserialize)]
struct NamedFileStatus {
    #[serde(rename = "pathSuffix")]
    path_suffix: String,
}

#[async_trait]
impl Driver for WebHdfsDriver {
    async fn get_content(&self, path: &str) -> Result<Bytes> {
        self.check_scope(path)?;
        let url = self.namenode_url(&self.full_path(path), "OPEN", &[]);
        let resp = self.two_hop(reqwest::Method::GET, url, None).await?;
        resp.bytes().await.map_err(Error::transport)
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        self.check_scope(path)?;
        let url = self.namenode_url(
            &self.full_path(path),
            "CREATE",
            &[("overwrite", "true")],
        );
        self.two_hop(reqwest::Method::PUT, url, Some(content))
            .await?;
        Ok(())
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<BoxReader> {
        self.check_scope(path)?;
        let data = self.get_content(path).await?;
        let sliced = if (offset as usize) < data.len() {
            data.slice((offset as usize)..)
        } else {
            Bytes::new()
        };
        Ok(Box::new(std::io::Cursor::new(sliced.to_vec())))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn Writer>> {
        self.check_scope(path)?;
        let existing_size = if append {
            self.stat(path).await?.size
        } else {
            let url = self.namenode_url(&self.full_path(path), "CREATE", &[("overwrite", "true")]);
            self.two_hop(reqwest::Method::PUT, url, Some(Bytes::new()))
                .await?;
            0
        };
        Ok(Box::new(WebHdfsWriter {
            driver_path: path.to_string(),
            full_path: self.full_path(path),
            namenode_url: self.namenode_url.clone(),
            user_name: self.user_name.clone(),
            client: self.client.clone(),
            buffer: AppendBuffer::new(DEFAULT_BLOCK_SIZE),
            size: existing_size,
            state: WriterState::Open,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        self.check_scope(path)?;
        let url = self.namenode_url(&self.full_path(path), "GETFILESTATUS", &[]);
        let resp = self.two_hop(reqwest::Method::GET, url, None).await?;
        let wrapper: FileStatusWrapper = resp.json().await.map_err(Error::transport)?;
        Ok(FileInfo {
            path: path.to_string(),
            size: wrapper.file_status.length,
            mod_time: std::time::UNIX_EPOCH
                + Duration::from_millis(wrapper.file_status.modification_time),
            is_dir: wrapper.file_status.kind == "DIRECTORY",
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        self.check_scope(path)?;
        let url = self.namenode_url(&self.full_path(path), "LISTSTATUS", &[]);
        let resp = self.two_hop(reqwest::Method::GET, url, None).await?;
        let wrapper: ListStatusWrapper = resp.json().await.map_err(Error::transport)?;
        Ok(wrapper
            .file_statuses
            .file_status
            .into_iter()
            .map(|s| {
                if path.ends_with('/') {
                    format!("{path}{}", s.path_suffix)
                } else {
                    format!("{path}/{}", s.path_suffix)
                }
            })
            .collect())
    }

    async fn move_to(&self, src: &str, dst: &str) -> Result<()> {
        self.check_scope(src)?;
        self.check_scope(dst)?;
        let dest_full = self.full_path(dst);
        let url = self.namenode_url(&self.full_path(src), "RENAME", &[("destination", &dest_full)]);

        for attempt in 0..MOVE_RETRY_LIMIT {
            match self.boolean_op(reqwest::Method::PUT, url.clone()).await {
                Ok(true) => return Ok(()),
                Ok(false) if attempt + 1 < MOVE_RETRY_LIMIT => {
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Ok(false) => break,
                Err(e) if e.is_retryable() && attempt + 1 < MOVE_RETRY_LIMIT => {
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::transport("webhdfs rename did not become visible").with_detail("src", src))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_scope(path)?;
        let url = self.namenode_url(&self.full_path(path), "DELETE", &[("recursive", "true")]);

        for attempt in 0..MOVE_RETRY_LIMIT {
            match self.boolean_op(reqwest::Method::DELETE, url.clone()).await {
                Ok(true) => return Ok(()),
                Ok(false) if attempt + 1 < MOVE_RETRY_LIMIT => {
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Ok(false) => break,
                Err(e) if e.is_retryable() && attempt + 1 < MOVE_RETRY_LIMIT => {
                    tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::transport("webhdfs delete did not become visible").with_detail("path", path))
    }

    async fn url_for(&self, _path: &str, _opts: &UrlForOptions) -> Result<String> {
        // WebHDFS does not expose pre-signed URLs; callers must proxy
        // through this driver instead.
        Err(Error::unsupported_method())
    }
}

#[derive(Debug)]
struct WebHdfsWriter {
    driver_path: String,
    full_path: String,
    namenode_url: String,
    user_name: String,
    client: Client,
    buffer: AppendBuffer,
    size: u64,
    state: WriterState,
}

impl WebHdfsWriter {
    fn append_url(&self) -> String {
        format!(
            "{}/webhdfs/v1{}?op=APPEND&user.name={}",
            self.namenode_url, self.full_path, self.user_name
        )
    }

    async fn flush_block(&mut self, block: Bytes) -> Result<()> {
        let first = self
            .client
            .post(self.append_url())
            .send()
            .await
            .map_err(Error::transport)?;
        if first.status() != StatusCode::TEMPORARY_REDIRECT {
            return Err(Error::transport(format!(
                "expected redirect from APPEND, got {}",
                first.status()
            )));
        }
        let location = first
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::transport("append redirect missing Location"))?
            .to_string();
        let second = self
            .client
            .post(location)
            .body(block)
            .send()
            .await
            .map_err(Error::transport)?;
        if !second.status().is_success() {
            return Err(Error::transport(format!(
                "append datanode returned {}",
                second.status()
            ))
            .with_detail("path", self.driver_path.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Writer for WebHdfsWriter {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        require_state(self.state, &[WriterState::Open])?;
        let len = data.len();
        if let Some(block) = self.buffer.push(&data) {
            self.flush_block(block).await?;
        }
        self.size += len as u64;
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open])?;
        if let Some(rest) = self.buffer.drain() {
            self.flush_block(rest).await?;
        }
        self.state = WriterState::Closed;
        Ok(())
    }

    async fn commit(&mut self, _size_hint: Option<u64>) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        if let Some(rest) = self.buffer.drain() {
            self.flush_block(rest).await?;
        }
        self.state = WriterState::Committed;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        self.state = WriterState::Cancelled;
        Ok(())
    }

    fn state(&self) -> WriterState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_exact_only_allows_literal_match() {
        let scope = Scope::Exact("/blobs/a".to_string());
        assert!(scope.allows("/blobs/a"));
        assert!(!scope.allows("/blobs/b"));
    }

    #[test]
    fn scope_prefix_allows_descendants() {
        let scope = Scope::Prefix("/blobs/".to_string());
        assert!(scope.allows("/blobs/sha256/ab/deadbeef/data"));
        assert!(!scope.allows("/uploads/x"));
    }

    #[test]
    fn scope_glob_matches_wildcard_pattern() {
        let scope = Scope::glob("/blobs/sha256/*/data").unwrap();
        assert!(scope.allows("/blobs/sha256/ab1234/data"));
        assert!(!scope.allows("/blobs/sha512/ab1234/data"));
    }
}
