//! S3-family multipart backend.
//!
//! One driver serves three wire protocols behind a single [`Flavor`]: S3
//! and QingStor are both S3-compatible (`CreateMultipartUpload`/
//! `UploadPart`/`CompleteMultipartUpload` via `aws-sdk-s3` against a
//! flavor-specific endpoint), while the Azure block-blob variant speaks a
//! different protocol (`PutBlock`/`PutBlockList`) over plain `reqwest`
//! calls. Both paths funnel through the same [`Writer`] state machine and
//! [`PartBuffer`] chunking so callers never see the difference.
//!
//! A part below the backend's minimum size cannot be uploaded standalone;
//! on resume, the writer must consolidate buffered bytes until a full
//! part is available before calling the backend, except for the final
//! part of a commit.

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;

use ocistore_core::errors::{Error, Result};

use crate::writer::{require_state, Part, PartBuffer, WriterState};
use crate::{BoxReader, Driver, FileInfo, UrlForOptions, UrlMethod, Writer};

/// Every part but the last must be at least this large; this is a hard
/// backend constraint (S3's own minimum, which QingStor and Azure both
/// tolerate too), distinct from the configurable [`S3Config::chunk_size`]
/// target the writer buffers up to before shipping a part.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

const MIN_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Up to 1000 keys per `DeleteObjects` call.
const DELETE_BATCH_SIZE: usize = 1000;

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavor {
    S3,
    QingStor,
    AzureBlockBlob,
}

#[derive(Clone, Deserialize)]
pub struct S3Config {
    pub flavor: Flavor,
    pub bucket_name: String,
    pub region: String,
    pub hostname: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub path_style: bool,
    /// Target part size the writer buffers up to before shipping a part,
    /// bounded `[4 MiB, 1 GiB]`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl S3Config {
    fn validated_chunk_size(&self) -> Result<usize> {
        if (MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            Ok(self.chunk_size)
        } else {
            Err(Error::transport(format!(
                "chunk_size {} out of bounds [{}, {}]",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )))
        }
    }

    pub async fn new_driver(&self) -> Result<S3Driver> {
        let chunk_size = self.validated_chunk_size()?;
        match self.flavor {
            Flavor::S3 | Flavor::QingStor => {
                let scp = SharedCredentialsProvider::new(
                    Credentials::new(
                        self.access_key.clone(),
                        self.secret_key.clone(),
                        None,
                        None,
                        "ocistore",
                    )
                    .provide_credentials()
                    .await
                    .map_err(Error::transport)?,
                );

                let endpoint = format!("https://{}", self.hostname);
                let sdk_config = aws_config::load_from_env().await;
                let config = aws_sdk_s3::config::Builder::from(&sdk_config)
                    .region(Region::new(self.region.clone()))
                    .credentials_provider(scp)
                    .endpoint_url(endpoint)
                    .force_path_style(self.path_style)
                    .build();

                Ok(S3Driver {
                    flavor: self.flavor,
                    bucket: self.bucket_name.clone(),
                    chunk_size,
                    client: Some(Client::from_conf(config)),
                    azure: None,
                })
            }
            Flavor::AzureBlockBlob => Ok(S3Driver {
                flavor: self.flavor,
                bucket: self.bucket_name.clone(),
                chunk_size,
                client: None,
                azure: Some(AzureBlobClient::new(
                    self.hostname.clone(),
                    self.bucket_name.clone(),
                    self.secret_key.clone(),
                )),
            }),
        }
    }
}

/// Thin Azure block-blob client: `hostname` is the storage account host
/// (`<account>.blob.core.windows.net`), `sas_token` is appended verbatim
/// to every request's query string.
#[derive(Clone, Debug)]
struct AzureBlobClient {
    http: reqwest::Client,
    hostname: String,
    container: String,
    sas_token: String,
}

impl AzureBlobClient {
    fn new(hostname: String, container: String, sas_token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            hostname,
            container,
            sas_token,
        }
    }

    fn blob_url(&self, key: &str) -> String {
        format!(
            "https://{}/{}/{}?{}",
            self.hostname,
            self.container,
            key.trim_start_matches('/'),
            self.sas_token
        )
    }

    async fn put_block(&self, key: &str, block_id: &str, body: Bytes) -> Result<()> {
        let url = format!(
            "{}&comp=block&blockid={}",
            self.blob_url(key),
            urlencoding_block_id(block_id)
        );
        let resp = self
            .http
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;
        if !resp.status().is_success() {
            return Err(Error::transport(format!(
                "azure put block failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn put_block_list(&self, key: &str, block_ids: &[String]) -> Result<()> {
        let mut body = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
        for id in block_ids {
            body.push_str(&format!("<Latest>{}</Latest>", urlencoding_block_id(id)));
        }
        body.push_str("</BlockList>");

        let url = format!("{}&comp=blocklist", self.blob_url(key));
        let resp = self
            .http
            .put(url)
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;
        if !resp.status().is_success() {
            return Err(Error::transport(format!(
                "azure put block list failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let resp = self
            .http
            .get(self.blob_url(key))
            .send()
            .await
            .map_err(Error::transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::path_not_found(key));
        }
        resp.bytes().await.map_err(Error::transport)
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let resp = self
            .http
            .put(self.blob_url(key))
            .header("x-ms-blob-type", "BlockBlob")
            .body(body)
            .send()
            .await
            .map_err(Error::transport)?;
        if !resp.status().is_success() {
            return Err(Error::transport(format!(
                "azure put blob failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.blob_url(key))
            .send()
            .await
            .map_err(Error::transport)?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::transport(format!(
                "azure delete blob failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn urlencoding_block_id(id: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(id.as_bytes())
}

#[derive(Debug)]
pub struct S3Driver {
    flavor: Flavor,
    bucket: String,
    chunk_size: usize,
    client: Option<Client>,
    azure: Option<AzureBlobClient>,
}

impl S3Driver {
    fn s3(&self) -> &Client {
        self.client.as_ref().expect("s3 client present for S3/QingStor flavor")
    }

    fn azure(&self) -> &AzureBlobClient {
        self.azure.as_ref().expect("azure client present for AzureBlockBlob flavor")
    }

    /// Reconstructs the in-flight part list for a resumed multipart upload
    /// by finding the single in-progress upload under `path` and paging
    /// through `ListParts` for it.
    async fn list_parts_for_resume(&self, path: &str) -> Result<(String, Vec<Part>)> {
        let listed = self
            .s3()
            .list_multipart_uploads()
            .bucket(&self.bucket)
            .prefix(path)
            .send()
            .await
            .map_err(map_sdk_err)?;
        let upload_id = listed
            .uploads
            .unwrap_or_default()
            .into_iter()
            .find(|u| u.key.as_deref() == Some(path))
            .and_then(|u| u.upload_id)
            .ok_or_else(|| Error::path_not_found(path))?;

        let mut parts = Vec::new();
        let mut part_number_marker: Option<String> = None;
        loop {
            let mut req = self
                .s3()
                .list_parts()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id);
            if let Some(marker) = &part_number_marker {
                req = req.part_number_marker(marker);
            }
            let out = req.send().await.map_err(map_sdk_err)?;
            parts.extend(out.parts.unwrap_or_default().into_iter().map(|p| Part {
                part_number: p.part_number.unwrap_or_default(),
                etag: p.e_tag,
                size: p.size.unwrap_or(0) as u64,
            }));

            if out.is_truncated.unwrap_or(false) {
                part_number_marker = out.next_part_number_marker;
                if part_number_marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        parts.sort_by_key(|p| p.part_number);
        Ok((upload_id, parts))
    }

    /// S3's minimum-part-size special case: a resumed upload whose last
    /// uploaded part is below [`MIN_PART_SIZE`] can never legally accept
    /// another part, since every non-final part must clear that minimum.
    /// Materializes the object under the stale upload, re-initiates a
    /// fresh one, and downloads the whole object back into memory so
    /// buffering can resume from a clean boundary. The sole path in this
    /// driver that reads a whole in-flight blob back into memory.
    async fn consolidate(&self, path: &str, upload_id: String, parts: Vec<Part>) -> Result<(String, Bytes)> {
        let mut builder = CompletedMultipartUpload::builder();
        for part in &parts {
            let mut cp = CompletedPart::builder().part_number(part.part_number);
            if let Some(etag) = &part.etag {
                cp = cp.e_tag(etag);
            }
            builder = builder.parts(cp.build());
        }
        self.s3()
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(&upload_id)
            .multipart_upload(builder.build())
            .send()
            .await
            .map_err(map_sdk_err)?;

        let whole = self.get_content(path).await?;

        let out = self
            .s3()
            .create_multipart_upload()
            .key(path)
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(map_sdk_err)?;
        let new_upload_id = out
            .upload_id
            .ok_or_else(|| Error::transport("CreateMultipartUpload returned no upload id"))?;

        Ok((new_upload_id, whole))
    }
}

#[async_trait]
impl Driver for S3Driver {
    async fn get_content(&self, path: &str) -> Result<Bytes> {
        match self.flavor {
            Flavor::AzureBlockBlob => self.azure().get(path).await,
            _ => {
                let out = self
                    .s3()
                    .get_object()
                    .key(path)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                let bytes = out
                    .body
                    .collect()
                    .await
                    .map_err(Error::transport)?
                    .into_bytes();
                Ok(bytes)
            }
        }
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        match self.flavor {
            Flavor::AzureBlockBlob => self.azure().put(path, content).await,
            _ => {
                self.s3()
                    .put_object()
                    .key(path)
                    .body(ByteStream::from(content))
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                Ok(())
            }
        }
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
        match self.flavor {
            Flavor::AzureBlockBlob => {
                if append {
                    // Azure block-blob resume has no ListParts equivalent
                    // and is not wired up here; callers drive resume
                    // through the Upload Session Manager for this flavor.
                    return Err(Error::unsupported_method()
                        .with_detail("reason", "azure block-blob append resume not implemented"));
                }
                Ok(Box::new(AzureBlockWriter {
                    client: self.azure().clone(),
                    key: path.to_string(),
                    buffer: PartBuffer::new(self.chunk_size),
                    block_ids: Vec::new(),
                    size: 0,
                    state: WriterState::Open,
                }))
            }
            Flavor::S3 | Flavor::QingStor if append => {
                let (upload_id, parts) = self.list_parts_for_resume(path).await?;
                let needs_consolidation =
                    parts.last().map(|p| p.size < MIN_PART_SIZE as u64).unwrap_or(false);

                let (upload_id, parts, seed) = if needs_consolidation {
                    let (new_id, whole) = self.consolidate(path, upload_id, parts).await?;
                    (new_id, Vec::new(), Some(whole))
                } else {
                    (upload_id, parts, None)
                };

                let size = parts.iter().map(|p| p.size).sum::<u64>()
                    + seed.as_ref().map_or(0, |b| b.len() as u64);
                let next_part_number = parts.iter().map(|p| p.part_number).max().unwrap_or(0) + 1;

                let mut writer = S3Writer {
                    client: self.s3().clone(),
                    bucket: self.bucket.clone(),
                    key: path.to_string(),
                    upload_id,
                    buffer: PartBuffer::new(self.chunk_size),
                    parts,
                    next_part_number,
                    size,
                    state: WriterState::Open,
                };
                if let Some(bytes) = seed {
                    writer.flush_ready(&bytes).await?;
                }
                Ok(Box::new(writer))
            }
            Flavor::S3 | Flavor::QingStor => {
                let out = self
                    .s3()
                    .create_multipart_upload()
                    .key(path)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                let upload_id = out
                    .upload_id
                    .ok_or_else(|| Error::transport("CreateMultipartUpload returned no upload id"))?;
                Ok(Box::new(S3Writer {
                    client: self.s3().clone(),
                    bucket: self.bucket.clone(),
                    key: path.to_string(),
                    upload_id,
                    buffer: PartBuffer::new(self.chunk_size),
                    parts: Vec::new(),
                    next_part_number: 1,
                    size: 0,
                    state: WriterState::Open,
                }))
            }
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        match self.flavor {
            Flavor::AzureBlockBlob => {
                let body = self.azure().get(path).await?;
                Ok(FileInfo {
                    path: path.to_string(),
                    size: body.len() as u64,
                    mod_time: std::time::SystemTime::now(),
                    is_dir: false,
                })
            }
            _ => {
                let out = self
                    .s3()
                    .head_object()
                    .key(path)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                Ok(FileInfo {
                    path: path.to_string(),
                    size: out.content_length.unwrap_or(0) as u64,
                    mod_time: out
                        .last_modified
                        .and_then(|d| std::time::SystemTime::try_from(d).ok())
                        .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                    is_dir: false,
                })
            }
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        match self.flavor {
            Flavor::AzureBlockBlob => Err(Error::unsupported_method()
                .with_detail("reason", "azure block-blob listing not implemented")),
            _ => {
                let mut entries = Vec::new();
                let mut continuation_token: Option<String> = None;
                loop {
                    let mut req = self
                        .s3()
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(path)
                        .delimiter("/");
                    if let Some(token) = &continuation_token {
                        req = req.continuation_token(token);
                    }
                    let out = req.send().await.map_err(map_sdk_err)?;

                    entries.extend(out.contents.unwrap_or_default().into_iter().filter_map(|o| o.key));
                    entries.extend(
                        out.common_prefixes
                            .unwrap_or_default()
                            .into_iter()
                            .filter_map(|p| p.prefix),
                    );

                    if out.is_truncated.unwrap_or(false) {
                        continuation_token = out.next_continuation_token;
                        if continuation_token.is_none() {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                Ok(entries)
            }
        }
    }

    async fn move_to(&self, src: &str, dst: &str) -> Result<()> {
        match self.flavor {
            Flavor::AzureBlockBlob => {
                let body = self.azure().get(src).await?;
                self.azure().put(dst, body).await?;
                self.azure().delete(src).await
            }
            _ => {
                let copy_source = format!("{}/{}", self.bucket, src);
                self.s3()
                    .copy_object()
                    .copy_source(copy_source)
                    .key(dst)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                self.s3()
                    .delete_object()
                    .key(src)
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(map_sdk_err)?;
                Ok(())
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.flavor {
            Flavor::AzureBlockBlob => self.azure().delete(path).await,
            _ => {
                let mut continuation_token: Option<String> = None;
                loop {
                    let mut req = self
                        .s3()
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(path);
                    if let Some(token) = &continuation_token {
                        req = req.continuation_token(token);
                    }
                    let out = req.send().await.map_err(map_sdk_err)?;
                    let keys: Vec<String> =
                        out.contents.unwrap_or_default().into_iter().filter_map(|o| o.key).collect();

                    for batch in keys.chunks(DELETE_BATCH_SIZE) {
                        let mut builder = Delete::builder();
                        for key in batch {
                            builder = builder.objects(ObjectIdentifier::builder().key(key).build().map_err(Error::transport)?);
                        }
                        self.s3()
                            .delete_objects()
                            .bucket(&self.bucket)
                            .delete(builder.build().map_err(Error::transport)?)
                            .send()
                            .await
                            .map_err(map_sdk_err)?;
                    }

                    if out.is_truncated.unwrap_or(false) {
                        continuation_token = out.next_continuation_token;
                        if continuation_token.is_none() {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    async fn url_for(&self, path: &str, opts: &UrlForOptions) -> Result<String> {
        match self.flavor {
            Flavor::AzureBlockBlob => Ok(self.azure().blob_url(path)),
            _ => {
                let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(opts.expiry)
                    .map_err(Error::transport)?;
                let url = match opts.method {
                    UrlMethod::Get => {
                        self.s3()
                            .get_object()
                            .key(path)
                            .bucket(&self.bucket)
                            .presigned(presigning)
                            .await
                    }
                    UrlMethod::Head => {
                        self.s3()
                            .head_object()
                            .key(path)
                            .bucket(&self.bucket)
                            .presigned(presigning)
                            .await
                    }
                }
                .map_err(map_sdk_err)?;
                Ok(url.uri().to_string())
            }
        }
    }
}

fn map_sdk_err<E: std::fmt::Display, R>(err: SdkError<E, R>) -> Error {
    Error::transport(err.to_string())
}

#[derive(Debug)]
struct S3Writer {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    buffer: PartBuffer,
    parts: Vec<Part>,
    next_part_number: i32,
    size: u64,
    state: WriterState,
}

impl S3Writer {
    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        let part_number = self.next_part_number;
        self.next_part_number += 1;
        let len = body.len() as u64;
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_err)?;
        self.parts.push(Part {
            part_number,
            etag: out.e_tag,
            size: len,
        });
        Ok(())
    }

    async fn flush_ready(&mut self, data: &[u8]) -> Result<()> {
        let ready = self.buffer.push(data);
        for part in ready {
            self.upload_part(part).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Writer for S3Writer {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        require_state(self.state, &[WriterState::Open])?;
        let len = data.len();
        self.flush_ready(&data).await?;
        self.size += len as u64;
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open])?;
        self.state = WriterState::Closed;
        Ok(())
    }

    async fn commit(&mut self, _size_hint: Option<u64>) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        if let Some(rest) = self.buffer.drain() {
            self.upload_part(rest).await?;
        }
        let mut builder = CompletedMultipartUpload::builder();
        for part in &self.parts {
            let mut cp = CompletedPart::builder().part_number(part.part_number);
            if let Some(etag) = &part.etag {
                cp = cp.e_tag(etag);
            }
            builder = builder.parts(cp.build());
        }
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(builder.build())
            .send()
            .await
            .map_err(map_sdk_err)?;
        self.state = WriterState::Committed;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(map_sdk_err)?;
        self.state = WriterState::Cancelled;
        Ok(())
    }

    fn state(&self) -> WriterState {
        self.state
    }
}

#[derive(Debug)]
struct AzureBlockWriter {
    client: AzureBlobClient,
    key: String,
    buffer: PartBuffer,
    block_ids: Vec<String>,
    size: u64,
    state: WriterState,
}

impl AzureBlockWriter {
    fn next_block_id(&self) -> String {
        format!("{:08}", self.block_ids.len())
    }

    async fn flush_ready(&mut self, data: &[u8]) -> Result<()> {
        let ready = self.buffer.push(data);
        for block in ready {
            let id = self.next_block_id();
            self.client.put_block(&self.key, &id, block).await?;
            self.block_ids.push(id);
        }
        Ok(())
    }
}

#[async_trait]
impl Writer for AzureBlockWriter {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        require_state(self.state, &[WriterState::Open])?;
        let len = data.len();
        self.flush_ready(&data).await?;
        self.size += len as u64;
        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open])?;
        self.state = WriterState::Closed;
        Ok(())
    }

    async fn commit(&mut self, _size_hint: Option<u64>) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        if let Some(rest) = self.buffer.drain() {
            let id = self.next_block_id();
            self.client.put_block(&self.key, &id, rest).await?;
            self.block_ids.push(id);
        }
        self.client.put_block_list(&self.key, &self.block_ids).await?;
        self.state = WriterState::Committed;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        // Azure discards un-committed blocks automatically after a
        // garbage-collection window; nothing to clean up synchronously.
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
    fn block_id_is_zero_padded_and_increments() {
        let client = AzureBlobClient::new("acct.blob.core.windows.net".into(), "c".into(), "sig=x".into());
        let writer = AzureBlockWriter {
            client,
            key: "/blobs/x".into(),
            buffer: PartBuffer::new(MIN_PART_SIZE),
            block_ids: vec!["00000000".into()],
            size: 0,
            state: WriterState::Open,
        };
        assert_eq!(writer.next_block_id(), "00000001");
    }
}
