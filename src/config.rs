use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::ArtifactSource;
use crate::error::{AppError, Result};

const DEFAULT_REPOSITORY: &str = "https://github.com/MaiM-with-u/MaiBot";
const DEFAULT_MIRROR: &str = "https://gitee.com/DrSmooth/MaiBot";
const DEFAULT_TAGS_URL: &str = "https://api.github.com/repos/MaiM-with-u/MaiBot/tags";

/// Load the config file, writing defaults if it does not exist yet.
pub fn load_or_init(path: &Path) -> Result<LauncherConfig> {
    if !path.exists() {
        let config = LauncherConfig::default();
        save_config(path, &config)?;
        log::info!("Wrote default configuration to {:?}", path);
        return Ok(config);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read {:?}: {}", path, e)))?;
    toml::from_str(&content).map_err(|e| AppError::config(format!("{:?}: {}", path, e)))
}

pub fn save_config(path: &Path, config: &LauncherConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Overrides the data directory chosen on the command line.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Wait after the graceful signal before forcing termination.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Wait after the forced kill before giving up on confirming death.
    #[serde(default = "default_kill_timeout_secs")]
    pub kill_timeout_secs: u64,
    /// Output lines retained per session.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Messages queued per viewer before new ones are dropped for that viewer.
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue: usize,
    /// Run command used for the main role when the instance does not declare one.
    #[serde(default = "default_main_command")]
    pub main_command: String,
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            kill_timeout_secs: default_kill_timeout_secs(),
            history_capacity: default_history_capacity(),
            viewer_queue: default_viewer_queue(),
            main_command: default_main_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_repository")]
    pub repository: String,
    #[serde(default = "default_mirror")]
    pub mirror: Option<String>,
    #[serde(default = "default_tags_url")]
    pub tags_url: String,
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_service_catalog")]
    pub services: BTreeMap<String, ServiceCatalogEntry>,
}

impl DeployConfig {
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn default_source(&self) -> ArtifactSource {
        ArtifactSource::Git {
            url: self.repository.clone(),
            mirror: self.mirror.clone(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repository: default_repository(),
            mirror: default_mirror(),
            tags_url: default_tags_url(),
            task_retention_secs: default_task_retention_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            services: default_service_catalog(),
        }
    }
}

/// A service the launcher knows how to acquire and run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalogEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: Option<ArtifactSource>,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    23456
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_kill_timeout_secs() -> u64 {
    5
}

fn default_history_capacity() -> usize {
    1000
}

fn default_viewer_queue() -> usize {
    256
}

fn default_main_command() -> String {
    "python bot.py".to_string()
}

fn default_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

fn default_mirror() -> Option<String> {
    Some(DEFAULT_MIRROR.to_string())
}

fn default_tags_url() -> String {
    DEFAULT_TAGS_URL.to_string()
}

fn default_task_retention_secs() -> u64 {
    300
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_service_catalog() -> BTreeMap<String, ServiceCatalogEntry> {
    BTreeMap::from([
        (
            "napcat".to_string(),
            ServiceCatalogEntry {
                description: "NapCat protocol adapter".to_string(),
                ..Default::default()
            },
        ),
        (
            "nonebot-ada".to_string(),
            ServiceCatalogEntry {
                description: "NoneBot chat-bridge adapter".to_string(),
                run_command: Some("nb run".to_string()),
                ..Default::default()
            },
        ),
    ])
}
