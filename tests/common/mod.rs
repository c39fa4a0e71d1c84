#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bot_launcher::commands::AppState;
use bot_launcher::config::{DeployConfig, SupervisorConfig};
use bot_launcher::deploy::{DeploySpec, DeploymentEngine, DeploymentSnapshot};
use bot_launcher::store::{MemoryStore, Store};

pub fn app(base: &Path, store: Arc<dyn Store>, supervisor: &SupervisorConfig) -> AppState {
    let deployer = DeploymentEngine::new(
        Arc::clone(&store),
        DeployConfig::default(),
        supervisor.main_command.clone(),
        base.join("downloads"),
    )
    .with_path_base(base);
    AppState::new(store, deployer, supervisor)
}

pub fn memory_app(base: &Path) -> AppState {
    app(base, Arc::new(MemoryStore::new()), &fast_supervisor())
}

pub fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        grace_period_secs: 2,
        kill_timeout_secs: 3,
        ..SupervisorConfig::default()
    }
}

pub fn bare_spec(name: &str, install_path: &str, port: u16) -> DeploySpec {
    DeploySpec {
        name: name.to_string(),
        version: "latest".to_string(),
        install_path: install_path.to_string(),
        port: u32::from(port),
        run_command: None,
        install_command: None,
        source: None,
        services: Vec::new(),
    }
}

pub fn free_port() -> u16 {
    portpicker::pick_unused_port().unwrap()
}

/// Poll until `check` holds or ten seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

pub async fn wait_terminal(state: &AppState, instance_id: &str) -> DeploymentSnapshot {
    for _ in 0..200 {
        let snapshot = state.deployment_status(instance_id).unwrap();
        if snapshot.terminal {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("deployment of {instance_id} never finished");
}
