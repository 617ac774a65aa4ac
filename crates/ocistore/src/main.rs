use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use ocistore_driver::factory::Registry;
use ocistore_http::{build_router, AppState};
use ocistore_storage::{BlobService, UploadSessionManager};

mod config;
use crate::config::{driver_registry_name, Config};

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    let mut dev_config = File::open(cli.config_file.unwrap_or_else(|| "./dev-config.yml".into()))?;
    let mut raw = String::new();
    dev_config.read_to_string(&mut raw)?;
    let config: Config = serde_yaml::from_str(&raw)?;

    let registry = Registry::with_defaults();
    let driver = registry
        .create(driver_registry_name(&config.blob_service.driver), &config.blob_service.driver)
        .await?;
    tracing::info!(backend = driver_registry_name(&config.blob_service.driver), "driver self-check passed");

    let blobs = Arc::new(BlobService::new(driver.clone(), config.blob_service.deletes_enabled));
    let sessions = Arc::new(UploadSessionManager::new(
        driver,
        blobs.clone(),
        config.blob_service.session_ttl(),
    ));

    let reap_interval = config.blob_service.reap_interval();
    let reaper_sessions = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reap_interval);
        loop {
            ticker.tick().await;
            reaper_sessions.reap_expired().await;
        }
    });

    let router = build_router(Arc::new(AppState { blobs, sessions }));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
