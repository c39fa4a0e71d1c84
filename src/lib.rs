mod archive;
pub mod commands;
pub mod config;
pub mod deploy;
mod download;
mod error;
mod github;
mod identity;
pub mod logging;
pub mod paths;
pub mod process;
pub mod server;
pub mod session;
pub mod store;
mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use commands::AppState;
use deploy::DeploymentEngine;
pub use error::{AppError, ErrorKind, Result};
use store::{FileStore, MemoryStore, Store};

/// Startup overrides, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Keep records in memory only.
    pub ephemeral: bool,
}

/// Run the launcher until Ctrl-C, then stop every supervised process.
pub async fn run(options: LaunchOptions) -> Result<()> {
    let mut data_dir = match &options.data_dir {
        Some(dir) => dir.clone(),
        None => paths::default_data_dir()?,
    };
    let config_path = options
        .config
        .clone()
        .unwrap_or_else(|| paths::config_path(&data_dir));
    let mut config = config::load_or_init(&config_path)?;
    if options.data_dir.is_none() {
        if let Some(dir) = &config.data_dir {
            data_dir = dir.clone();
        }
    }
    if let Some(host) = options.host {
        config.server.host = host;
    }
    if let Some(port) = options.port {
        config.server.port = port;
    }

    logging::init(&config.logging.level);
    paths::ensure_data_dirs(&data_dir)?;
    log::info!(
        "Starting bot-launcher {} (data dir: {:?})",
        env!("CARGO_PKG_VERSION"),
        data_dir
    );

    let store: Arc<dyn Store> = if options.ephemeral {
        log::warn!("Running with an in-memory store, nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::open(paths::state_path(&data_dir))?)
    };

    let deployer = DeploymentEngine::new(
        Arc::clone(&store),
        config.deploy.clone(),
        config.supervisor.main_command.clone(),
        data_dir.join("downloads"),
    );
    let state = Arc::new(AppState::new(store, deployer, &config.supervisor));

    let recovered = state.recover()?;
    if recovered > 0 {
        log::info!("Recovered {} records left by a previous run", recovered);
    }
    let sweeper = state.deployer.spawn_sweeper();

    let served = server::serve(Arc::clone(&state), &config.server, shutdown_signal()).await;

    sweeper.abort();
    log::info!("Shutting down, stopping all instances...");
    state.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
