use serde::Deserialize;

use ocistore_driver::config::Config as DriverConfig;
use ocistore_storage::BlobServiceConfig;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub blob_service: BlobServiceConfig,

    /// `0.0.0.0:8080`-style bind address for the HTTP listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// The registry name [`ocistore_driver::factory::Registry`] looks a
/// backend up under, derived from the deserialized variant tag so the
/// binary never has to duplicate the list of supported backends.
pub fn driver_registry_name(config: &DriverConfig) -> &'static str {
    match config {
        DriverConfig::Filesystem { .. } => "filesystem",
        DriverConfig::WebHdfs(_) => "webhdfs",
        DriverConfig::S3(_) => "s3",
    }
}
