//! IPC subprocess transport.
//!
//! Runs a [`crate::Driver`] in a child process and speaks to it over a Unix
//! domain socket, so a driver whose dependencies are awkward to link into
//! the main binary (or one that needs stronger fault isolation) can live
//! out-of-process while still satisfying the same [`crate::Driver`] trait
//! on the caller's side.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcDriver;
pub use server::serve;

use serde::Deserialize;
use tokio::process::Command;

use ocistore_core::errors::Result;

/// Config for a driver served out-of-process: `command`/`args` spawn the
/// subprocess, which is expected to call [`serve`] against `socket_path`.
#[derive(Clone, Debug, Deserialize)]
pub struct IpcConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub socket_path: String,
}

impl IpcConfig {
    pub async fn new_driver(&self) -> Result<IpcDriver> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        IpcDriver::spawn(command, &self.socket_path).await
    }
}
