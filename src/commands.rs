//! Operations offered to the request layer, one method per operation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::deploy::{DeploySpec, DeploymentEngine, DeploymentSnapshot, ServiceOffering};
use crate::error::{AppError, Result};
use crate::process::{InstanceStats, StopOutcome, Supervisor, TargetStatus, MAIN_ROLE};
use crate::session::{Attachment, HistoryRange, Inbound, Multiplexer, Outbound};
use crate::store::{Status, Store};
use crate::validation::{parse_session_key, validate_instance_id};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub path: PathBuf,
    pub port: u16,
    pub status: Status,
    pub live: TargetStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub install_path: PathBuf,
    pub port: u16,
    pub version: String,
    pub status: Status,
    pub installed_at: DateTime<Utc>,
    pub live: TargetStatus,
    pub services: Vec<ServiceSummary>,
}

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub deployer: DeploymentEngine,
    pub supervisor: Arc<Supervisor>,
    pub sessions: Arc<Multiplexer>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, deployer: DeploymentEngine, config: &SupervisorConfig) -> Self {
        let sessions = Arc::new(Multiplexer::new(
            config.history_capacity,
            config.viewer_queue,
        ));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&store),
            Arc::clone(&sessions),
            config,
        ));
        Self {
            store,
            deployer,
            supervisor,
            sessions,
        }
    }

    /// Settle whatever a previous run left behind. Returns the number of
    /// records changed.
    pub fn recover(&self) -> Result<usize> {
        let interrupted = self.deployer.recover_interrupted()?;
        let stale = self.supervisor.reconcile_on_boot()?;
        Ok(interrupted + stale)
    }

    pub async fn shutdown(&self) {
        self.supervisor.stop_all().await;
    }

    // === Deployment ===

    pub fn deploy(&self, spec: &DeploySpec) -> Result<String> {
        self.deployer.deploy(spec)
    }

    pub fn register_existing(&self, spec: &DeploySpec) -> Result<String> {
        self.deployer.register_existing(spec)
    }

    pub fn deployment_status(&self, instance_id: &str) -> Result<DeploymentSnapshot> {
        validate_instance_id(instance_id)?;
        self.deployer.get_status(instance_id)
    }

    pub async fn available_versions(&self) -> Vec<String> {
        self.deployer.list_versions().await
    }

    pub fn available_services(&self) -> Vec<ServiceOffering> {
        self.deployer.available_services()
    }

    // === Lifecycle ===

    pub async fn start_instance(&self, instance_id: &str) -> Result<u32> {
        self.supervisor.start_instance(instance_id).await
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<StopOutcome> {
        self.supervisor.stop_instance(instance_id).await
    }

    pub async fn restart_instance(&self, instance_id: &str) -> Result<u32> {
        self.supervisor.restart_instance(instance_id).await
    }

    /// Stop every role, then drop the records and sessions. Files on disk stay.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let instance = self
            .store
            .get_instance(instance_id)?
            .ok_or_else(|| AppError::instance_not_found(instance_id))?;
        if self.deployer.is_deploying(instance_id) || instance.status.is_deploying() {
            return Err(AppError::invalid_state(format!(
                "Instance {} is still being deployed",
                instance_id
            )));
        }

        self.supervisor.stop_instance(instance_id).await?;
        if self.supervisor.has_live_process(instance_id) {
            return Err(AppError::invalid_state(format!(
                "Instance {} still has running processes",
                instance_id
            )));
        }

        self.store.delete_instance(instance_id)?;
        self.supervisor.forget_instance(instance_id);
        let dropped = self.sessions.remove_instance_sessions(instance_id);
        log::info!(
            "Deleted instance {} ({}), {} sessions closed; files kept at {:?}",
            instance_id,
            instance.name,
            dropped,
            instance.install_path
        );
        Ok(())
    }

    // === Queries ===

    pub fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
        self.store
            .list_instances()?
            .into_iter()
            .map(|instance| {
                let services = self
                    .store
                    .list_services(&instance.id)?
                    .into_iter()
                    .map(|svc| ServiceSummary {
                        live: self.supervisor.target_status(&instance.id, &svc.name),
                        name: svc.name,
                        path: svc.path,
                        port: svc.port,
                        status: svc.status,
                    })
                    .collect();
                Ok(InstanceSummary {
                    live: self.supervisor.target_status(&instance.id, MAIN_ROLE),
                    id: instance.id,
                    name: instance.name,
                    install_path: instance.install_path,
                    port: instance.port,
                    version: instance.version,
                    status: instance.status,
                    installed_at: instance.installed_at,
                    services,
                })
            })
            .collect()
    }

    pub fn instance_stats(&self) -> Result<InstanceStats> {
        self.supervisor.list_status()
    }

    // === Sessions ===

    /// Attach a viewer after checking the target exists.
    pub fn attach_viewer(&self, key: &str, range: &HistoryRange) -> Result<Attachment> {
        let (instance_id, role) = parse_session_key(key)?;
        if self.store.get_instance(instance_id)?.is_none() {
            return Err(AppError::instance_not_found(instance_id));
        }
        if role != MAIN_ROLE
            && !self
                .store
                .list_services(instance_id)?
                .iter()
                .any(|svc| svc.name == role)
        {
            return Err(AppError::service_not_found(instance_id, role));
        }
        Ok(self.sessions.attach(key, range))
    }

    pub fn detach_viewer(&self, key: &str, viewer_id: Uuid) {
        self.sessions.detach(key, viewer_id);
    }

    pub fn handle_inbound(&self, key: &str, message: Inbound) -> Option<Outbound> {
        self.sessions
            .handle_inbound(key, message, self.supervisor.as_ref())
    }
}
