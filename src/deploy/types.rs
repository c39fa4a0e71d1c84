//! Deployment request and progress types.

use serde::{Deserialize, Serialize};

use super::source::ArtifactSource;
use crate::store::Status;

/// A request to deploy (or register) one instance and its services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    #[serde(alias = "instance_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub install_path: String,
    /// Kept wide so out-of-range values reach validation instead of failing to parse.
    pub port: u32,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub source: Option<ArtifactSource>,
    #[serde(default, alias = "install_services")]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub path: String,
    pub port: u32,
    #[serde(default)]
    pub run_command: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub source: Option<ArtifactSource>,
}

fn default_version() -> String {
    "latest".to_string()
}

/// Sub-progress of one declared service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceProgress {
    pub name: String,
    pub status: Status,
    /// 0-100
    pub progress: u8,
    pub message: String,
}

/// What `GetDeploymentStatus` returns, from a live task or from the store.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSnapshot {
    pub instance_id: String,
    pub status: Status,
    /// 0-100
    pub progress: u8,
    pub message: String,
    pub services: Vec<ServiceProgress>,
    pub terminal: bool,
}

/// A catalog entry as offered to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceOffering {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_legacy_field_names() {
        let spec: DeploySpec = serde_json::from_value(serde_json::json!({
            "instance_name": "bot1",
            "install_path": "~/bots/bot1",
            "port": 8000,
            "install_services": [{"name": "napcat", "path": "~/bots/bot1/napcat", "port": 9000}]
        }))
        .unwrap();
        assert_eq!(spec.name, "bot1");
        assert_eq!(spec.version, "latest");
        assert_eq!(spec.services.len(), 1);
        assert!(spec.services[0].run_command.is_none());
    }
}
