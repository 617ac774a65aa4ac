//! Local-filesystem backend.
//!
//! Every driver path is relative to `root`; `root` itself must already
//! exist. Offsets map directly onto file positions, so this backend is the
//! simplest of the three and the one the conformance harness runs against.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use ocistore_core::errors::{Error, Result};

use crate::writer::{require_state, WriterState};
use crate::{BoxReader, Driver, FileInfo, UrlForOptions, Writer};

#[derive(Debug)]
pub struct FilesystemDriver {
    root: PathBuf,
}

impl FilesystemDriver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport(e).with_detail("op", "create_dir_all"))?;
        }
        Ok(())
    }

    fn not_found(path: &str, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::path_not_found(path)
        } else {
            Error::transport(e).with_detail("path", path)
        }
    }
}

#[async_trait]
impl Driver for FilesystemDriver {
    async fn get_content(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path);
        let data = fs::read(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        let full = self.resolve(path);
        Self::ensure_parent(&full).await?;
        fs::write(&full, &content)
            .await
            .map_err(|e| Error::transport(e).with_detail("path", path))
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<BoxReader> {
        let full = self.resolve(path);
        let mut file = fs::File::open(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| Error::transport(e).with_detail("path", path))?;
        }
        Ok(Box::new(file))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn Writer>> {
        let full = self.resolve(path);
        if append {
            if fs::metadata(&full).await.is_err() {
                return Err(Error::path_not_found(path));
            }
        } else {
            Self::ensure_parent(&full).await?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&full)
            .await
            .map_err(|e| Error::transport(e).with_detail("path", path))?;
        let size = if append {
            fs::metadata(&full)
                .await
                .map_err(|e| Error::transport(e))?
                .len()
        } else {
            0
        };
        Ok(Box::new(FilesystemWriter {
            file,
            size,
            state: WriterState::Open,
        }))
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(FileInfo {
            path: path.to_string(),
            size: meta.len(),
            mod_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let full = self.resolve(path);
        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::transport(e).with_detail("path", path))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let joined = if path.ends_with('/') {
                format!("{path}{name}")
            } else {
                format!("{path}/{name}")
            };
            out.push(joined);
        }
        Ok(out)
    }

    async fn move_to(&self, src: &str, dst: &str) -> Result<()> {
        let full_src = self.resolve(src);
        let full_dst = self.resolve(dst);
        Self::ensure_parent(&full_dst).await?;
        fs::rename(&full_src, &full_dst)
            .await
            .map_err(|e| Self::not_found(src, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path);
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full)
                .await
                .map_err(|e| Error::transport(e).with_detail("path", path))
        } else {
            fs::remove_file(&full)
                .await
                .map_err(|e| Error::transport(e).with_detail("path", path))
        }
    }

    async fn url_for(&self, _path: &str, _opts: &UrlForOptions) -> Result<String> {
        // Filesystem has no notion of a pre-signed URL.
        Err(Error::unsupported_method())
    }
}

#[derive(Debug)]
struct FilesystemWriter {
    file: fs::File,
    size: u64,
    state: WriterState,
}

#[async_trait]
impl Writer for FilesystemWriter {
    async fn write(&mut self, data: Bytes) -> Result<usize> {
        require_state(self.state, &[WriterState::Open])?;
        self.file
            .write_all(&data)
            .await
            .map_err(|e| Error::transport(e).with_detail("op", "write"))?;
        self.size += data.len() as u64;
        Ok(data.len())
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        require_state(self.state, &[WriterState::Open])?;
        self.file
            .flush()
            .await
            .map_err(|e| Error::transport(e).with_detail("op", "flush"))?;
        self.state = WriterState::Closed;
        Ok(())
    }

    async fn commit(&mut self, _size_hint: Option<u64>) -> Result<()> {
        require_state(self.state, &[WriterState::Open, WriterState::Closed])?;
        self.file
            .flush()
            .await
            .map_err(|e| Error::transport(e).with_detail("op", "flush"))?;
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

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        driver
            .put_content("/a/b.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let got = driver.get_content("/a/b.txt").await.unwrap();
        assert_eq!(got, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn get_missing_is_path_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        let err = driver.get_content("/nope").await.unwrap_err();
        assert_eq!(err.code(), "PATH_NOT_FOUND");
    }

    #[tokio::test]
    async fn writer_enforces_state_machine() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        let mut w = driver.writer("/up", false).await.unwrap();
        w.write(Bytes::from_static(b"part1")).await.unwrap();
        assert_eq!(w.size(), 5);
        w.commit(None).await.unwrap();
        let err = w.write(Bytes::from_static(b"more")).await.unwrap_err();
        assert_eq!(err.code(), "WRITER_CLOSED");
    }

    #[tokio::test]
    async fn append_writer_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        let err = driver.writer("/missing", true).await.unwrap_err();
        assert_eq!(err.code(), "PATH_NOT_FOUND");
    }

    #[tokio::test]
    async fn move_then_stat_reflects_new_path() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = FilesystemDriver::new(tmp.path().to_path_buf());
        driver
            .put_content("/src.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        driver.move_to("/src.txt", "/dst.txt").await.unwrap();
        assert!(driver.get_content("/src.txt").await.is_err());
        let info = driver.stat("/dst.txt").await.unwrap();
        assert_eq!(info.size, 1);
    }
}
