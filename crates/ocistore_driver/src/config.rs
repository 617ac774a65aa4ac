//! Driver configuration.
//!
//! Deserialized straight from the YAML document `ocistore`'s binary loads
//! at startup; `Config::new_driver` is what [`crate::factory::Registry`]
//! calls after looking up the right backend by name.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use ocistore_core::errors::Result;

use crate::ipc::IpcConfig;
use crate::s3::S3Config;
use crate::webhdfs::WebHdfsConfig;
use crate::Driver;

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Config {
    #[serde(rename = "filesystem")]
    Filesystem { root: PathBuf },
    #[serde(rename = "webhdfs")]
    WebHdfs(WebHdfsConfig),
    #[serde(rename = "s3")]
    S3(S3Config),
    #[serde(rename = "ipc")]
    Ipc(IpcConfig),
}

impl Config {
    pub async fn new_driver(&self) -> Result<Arc<dyn Driver>> {
        match self {
            Config::Filesystem { root } => {
                Ok(Arc::new(crate::filesystem::FilesystemDriver::new(root.clone())))
            }
            Config::WebHdfs(cfg) => {
                Ok(Arc::new(crate::webhdfs::WebHdfsDriver::new(cfg.clone(), None)?))
            }
            Config::S3(cfg) => Ok(Arc::new(cfg.new_driver().await?)),
            Config::Ipc(cfg) => Ok(Arc::new(cfg.new_driver().await?)),
        }
    }
}
