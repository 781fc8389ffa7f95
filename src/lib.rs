pub mod analysis;
pub mod app;
pub mod capture;
pub mod db;
pub mod extraction;
pub mod keystore;
pub mod scheduling;
pub mod settings;
pub mod storage;
pub mod summary;
pub mod utils;
pub mod video;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use log::{info, warn};

pub use app::Dayflow;
use keystore::EnvKeyStore;

const DATA_DIR_ENV: &str = "DAYFLOW_DATA_DIR";

fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("Dayflow"))
        .ok_or_else(|| anyhow!("no local data directory; set {DATA_DIR_ENV}"))
}

/// Runs the recorder headless until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Dayflow starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async {
        let app = Dayflow::initialize(data_dir()?, &EnvKeyStore).await?;
        app.start_schedulers().await;
        if !app.start_capture().await {
            warn!("capture did not start");
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        app.shutdown().await;
        info!("Dayflow stopped");
        Ok(())
    })
}
