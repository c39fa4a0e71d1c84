//! Instance deployment and registration.

mod source;
mod task;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::task::JoinHandle;

pub use source::ArtifactSource;
pub use types::{DeploySpec, DeploymentSnapshot, ServiceOffering, ServiceProgress, ServiceSpec};

use self::source::{acquire, prepare_empty, FetchContext};
use self::task::TaskRegistry;
use crate::config::DeployConfig;
use crate::error::{AppError, Result};
use crate::github;
use crate::identity::generate_instance_id;
use crate::paths::resolve_path_from;
use crate::process::run_to_completion;
use crate::store::{InstanceRecord, ServiceRecord, Status, Store};
use crate::validation::validate_deploy_spec;

/// How often the sweeper looks for expired tasks.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A service with every path resolved and every default applied.
#[derive(Debug, Clone)]
struct PlannedService {
    name: String,
    path: PathBuf,
    port: u16,
    run_command: String,
    install_command: Option<String>,
    source: Option<ArtifactSource>,
}

#[derive(Debug, Clone)]
struct DeployPlan {
    instance: InstanceRecord,
    source: ArtifactSource,
    services: Vec<PlannedService>,
    /// Base the paths were resolved against; local sources resolve against it too.
    path_base: PathBuf,
}

pub struct DeploymentEngine {
    store: Arc<dyn Store>,
    tasks: Arc<TaskRegistry>,
    config: Arc<DeployConfig>,
    main_command: String,
    client: Client,
    download_dir: PathBuf,
    path_base: Option<PathBuf>,
}

impl DeploymentEngine {
    pub fn new(
        store: Arc<dyn Store>,
        config: DeployConfig,
        main_command: impl Into<String>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            tasks: Arc::new(TaskRegistry::new(config.task_retention())),
            config: Arc::new(config),
            main_command: main_command.into(),
            client: Client::new(),
            download_dir: download_dir.into(),
            path_base: None,
        }
    }

    /// Resolve user paths against `base` instead of the current directory.
    pub fn with_path_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.path_base = Some(base.into());
        self
    }

    fn path_base(&self) -> Result<PathBuf> {
        match &self.path_base {
            Some(base) => Ok(base.clone()),
            None => std::env::current_dir()
                .map_err(|e| AppError::io(format!("Failed to read current directory: {}", e))),
        }
    }

    /// Validate, resolve every path and apply defaults. No side effects.
    fn plan(&self, spec: &DeploySpec, status: Status) -> Result<DeployPlan> {
        validate_deploy_spec(spec)?;
        let base = self.path_base()?;

        let install_path = resolve_path_from(&spec.install_path, &base)?;
        let services = spec
            .services
            .iter()
            .map(|svc| self.plan_service(svc, &base))
            .collect::<Result<Vec<_>>>()?;

        let name = spec.name.trim().to_string();
        let instance = InstanceRecord {
            id: generate_instance_id(&name)?,
            name,
            install_path,
            port: narrow_port(spec.port)?,
            version: spec.version.clone(),
            status,
            installed_at: Utc::now(),
            run_command: spec
                .run_command
                .clone()
                .unwrap_or_else(|| self.main_command.clone()),
            install_command: spec.install_command.clone(),
        };

        Ok(DeployPlan {
            instance,
            source: spec
                .source
                .clone()
                .unwrap_or_else(|| self.config.default_source()),
            services,
            path_base: base,
        })
    }

    fn plan_service(&self, svc: &ServiceSpec, base: &Path) -> Result<PlannedService> {
        let name = svc.name.trim().to_string();
        let catalog = self.config.services.get(&name);
        Ok(PlannedService {
            path: resolve_path_from(&svc.path, base)?,
            port: narrow_port(svc.port)?,
            run_command: svc
                .run_command
                .clone()
                .or_else(|| catalog.and_then(|c| c.run_command.clone()))
                .unwrap_or_default(),
            install_command: svc
                .install_command
                .clone()
                .or_else(|| catalog.and_then(|c| c.install_command.clone())),
            source: svc
                .source
                .clone()
                .or_else(|| catalog.and_then(|c| c.source.clone())),
            name,
        })
    }

    fn ensure_name_free(&self, name: &str) -> Result<()> {
        if let Some(existing) = self.store.find_instance_by_name(name)? {
            return Err(AppError::name_conflict(name, &existing.id));
        }
        Ok(())
    }

    /// Start a deployment in the background and return the new instance id.
    pub fn deploy(&self, spec: &DeploySpec) -> Result<String> {
        let plan = self.plan(spec, Status::Pending)?;
        self.ensure_name_free(&plan.instance.name)?;

        let instance_id = plan.instance.id.clone();
        self.store.create_instance(plan.instance.clone())?;
        self.tasks
            .insert(&instance_id, plan.services.iter().map(|s| s.name.as_str()));

        log::info!(
            "Deploying instance {} ({}) version {} into {:?}",
            instance_id,
            plan.instance.name,
            plan.instance.version,
            plan.instance.install_path
        );

        let job = DeployJob {
            store: Arc::clone(&self.store),
            tasks: Arc::clone(&self.tasks),
            client: self.client.clone(),
            download_dir: self.download_dir.clone(),
            timeout: self.config.command_timeout(),
            plan,
        };
        tokio::spawn(job.run());

        Ok(instance_id)
    }

    /// Record an already provisioned tree. Nothing is persisted unless every
    /// check passes.
    pub fn register_existing(&self, spec: &DeploySpec) -> Result<String> {
        let plan = self.plan(spec, Status::Stopped)?;

        if !plan.instance.install_path.is_dir() {
            return Err(AppError::path_not_found(&plan.instance.install_path));
        }
        for svc in &plan.services {
            if !svc.path.is_dir() {
                return Err(AppError::service_path_not_found(&svc.name, &svc.path));
            }
        }
        self.ensure_name_free(&plan.instance.name)?;

        let instance_id = plan.instance.id.clone();
        let services = plan
            .services
            .iter()
            .map(|svc| service_record(&instance_id, svc))
            .collect();
        self.store
            .create_instance_with_services(plan.instance, services)?;

        log::info!("Registered existing instance {}", instance_id);
        Ok(instance_id)
    }

    /// Live task progress, or the persisted outcome once the task is gone.
    pub fn get_status(&self, instance_id: &str) -> Result<DeploymentSnapshot> {
        if let Some(snapshot) = self.tasks.snapshot(instance_id) {
            return Ok(snapshot);
        }

        let instance = self
            .store
            .get_instance(instance_id)?
            .ok_or_else(|| AppError::instance_not_found(instance_id))?;
        let services = self
            .store
            .list_services(instance_id)?
            .into_iter()
            .map(|svc| ServiceProgress {
                name: svc.name,
                status: svc.status,
                progress: persisted_progress(svc.status),
                message: persisted_message(svc.status).to_string(),
            })
            .collect();

        Ok(DeploymentSnapshot {
            instance_id: instance.id,
            status: instance.status,
            progress: persisted_progress(instance.status),
            message: persisted_message(instance.status).to_string(),
            services,
            terminal: !instance.status.is_deploying(),
        })
    }

    /// True while a deployment for `instance_id` has not reached a terminal state.
    pub fn is_deploying(&self, instance_id: &str) -> bool {
        self.tasks.is_active(instance_id)
    }

    pub fn sweep_expired(&self) -> usize {
        self.tasks.sweep()
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let tasks = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let evicted = tasks.sweep();
                if evicted > 0 {
                    log::debug!("Evicted {} finished deployment tasks", evicted);
                }
            }
        })
    }

    /// Mark deployments that were cut short by a launcher restart as failed.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for instance in self.store.list_instances()? {
            if instance.status.is_deploying() && !self.tasks.contains(&instance.id) {
                log::warn!(
                    "Instance {} was left {} by a previous run, marking as error",
                    instance.id,
                    instance.status
                );
                self.store
                    .update_instance_status(&instance.id, Status::Error)?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    pub async fn list_versions(&self) -> Vec<String> {
        github::list_versions(&self.client, &self.config.tags_url).await
    }

    pub fn available_services(&self) -> Vec<ServiceOffering> {
        self.config
            .services
            .iter()
            .map(|(name, entry)| ServiceOffering {
                name: name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }
}

fn narrow_port(port: u32) -> Result<u16> {
    u16::try_from(port).map_err(|_| AppError::validation("port", format!("{} is out of range", port)))
}

fn service_record(instance_id: &str, svc: &PlannedService) -> ServiceRecord {
    ServiceRecord {
        instance_id: instance_id.to_string(),
        name: svc.name.clone(),
        path: svc.path.clone(),
        port: svc.port,
        run_command: svc.run_command.clone(),
        install_command: svc.install_command.clone(),
        status: Status::Stopped,
    }
}

fn persisted_progress(status: Status) -> u8 {
    match status {
        Status::Running | Status::Stopped => 100,
        Status::Pending | Status::Installing | Status::Error => 0,
    }
}

fn persisted_message(status: Status) -> &'static str {
    match status {
        Status::Running | Status::Stopped => "Deployment complete",
        Status::Error => "Deployment failed",
        Status::Pending | Status::Installing => "Deployment interrupted",
    }
}

/// Everything the background half of a deployment needs, owned.
struct DeployJob {
    store: Arc<dyn Store>,
    tasks: Arc<TaskRegistry>,
    client: Client,
    download_dir: PathBuf,
    timeout: Duration,
    plan: DeployPlan,
}

impl DeployJob {
    async fn run(self) {
        let instance_id = self.plan.instance.id.clone();
        match self.execute().await {
            Ok(()) => {
                log::info!("Instance {} deployed", instance_id);
                self.tasks
                    .finish(&instance_id, Status::Stopped, "Deployment complete");
            }
            Err(e) => {
                log::error!("Deployment of instance {} failed: {}", instance_id, e);
                self.tasks.finish(&instance_id, Status::Error, &e.message());
                if let Err(store_err) = self
                    .store
                    .update_instance_status(&instance_id, Status::Error)
                {
                    log::error!(
                        "Failed to record error status for instance {}: {}",
                        instance_id,
                        store_err
                    );
                }
            }
        }
    }

    fn ctx(&self) -> FetchContext<'_> {
        FetchContext {
            client: &self.client,
            download_dir: &self.download_dir,
            path_base: &self.plan.path_base,
            timeout: self.timeout,
        }
    }

    async fn execute(&self) -> Result<()> {
        let instance = &self.plan.instance;
        let id = instance.id.as_str();
        let ctx = self.ctx();

        self.store.update_instance_status(id, Status::Installing)?;
        self.tasks.set_progress(
            id,
            Status::Installing,
            5,
            &format!("Fetching {} {}", instance.name, instance.version),
        );

        acquire(&self.plan.source, &instance.version, &instance.install_path, &ctx).await?;
        self.tasks
            .set_progress(id, Status::Installing, 40, "Bot files ready");

        let total = self.plan.services.len().max(1);
        for (index, svc) in self.plan.services.iter().enumerate() {
            self.tasks
                .set_service(id, &svc.name, Status::Installing, 10, "Fetching files");
            let fetched = match &svc.source {
                Some(source) => acquire(source, &instance.version, &svc.path, &ctx).await,
                None => prepare_empty(&svc.path),
            };
            if let Err(e) = fetched {
                self.tasks
                    .set_service(id, &svc.name, Status::Error, 0, &e.message());
                return Err(e);
            }
            self.tasks
                .set_service(id, &svc.name, Status::Installing, 50, "Files ready");
            let progress = 40 + (30 * (index + 1) / total) as u8;
            self.tasks.set_progress(
                id,
                Status::Installing,
                progress,
                &format!("Service {} fetched", svc.name),
            );
        }

        if let Some(command) = &instance.install_command {
            self.tasks
                .set_progress(id, Status::Installing, 75, "Installing dependencies");
            run_to_completion(command, &instance.install_path, self.timeout).await?;
        }

        for svc in &self.plan.services {
            if let Some(command) = &svc.install_command {
                self.tasks.set_service(
                    id,
                    &svc.name,
                    Status::Installing,
                    70,
                    "Installing dependencies",
                );
                if let Err(e) = run_to_completion(command, &svc.path, self.timeout).await {
                    self.tasks
                        .set_service(id, &svc.name, Status::Error, 0, &e.message());
                    return Err(e);
                }
            }
            self.tasks
                .set_service(id, &svc.name, Status::Stopped, 100, "Ready");
        }

        self.tasks
            .set_progress(id, Status::Installing, 95, "Saving records");
        for svc in &self.plan.services {
            self.store.create_service(service_record(id, svc))?;
        }
        self.store.update_instance_status(id, Status::Stopped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::store::MemoryStore;

    fn engine(base: &Path) -> (Arc<MemoryStore>, DeploymentEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = DeploymentEngine::new(
            Arc::clone(&store) as Arc<dyn Store>,
            DeployConfig::default(),
            "python bot.py",
            base.join("downloads"),
        )
        .with_path_base(base);
        (store, engine)
    }

    fn spec(template: &Path) -> DeploySpec {
        DeploySpec {
            name: "bot1".to_string(),
            version: "latest".to_string(),
            install_path: "~/bots/bot1".to_string(),
            port: 8000,
            run_command: None,
            install_command: None,
            source: Some(ArtifactSource::Local {
                path: template.display().to_string(),
            }),
            services: vec![ServiceSpec {
                name: "svc".to_string(),
                path: "~/bots/bot1/svc".to_string(),
                port: 9000,
                run_command: Some("./run.sh".to_string()),
                install_command: None,
                source: None,
            }],
        }
    }

    #[tokio::test]
    async fn deploy_conflict_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine(dir.path());
        fs::create_dir_all(dir.path().join("existing")).unwrap();

        let mut first = spec(dir.path());
        first.install_path = "existing".to_string();
        first.services.clear();
        engine.register_existing(&first).unwrap();

        let err = engine.deploy(&spec(dir.path())).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
        assert_eq!(store.list_instances().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_before_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine(dir.path());
        let mut bad = spec(dir.path());
        bad.port = 0;
        let err = engine.deploy(&bad).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(store.list_instances().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_status_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine(dir.path());
        let err = engine.get_status("0".repeat(40).as_str()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn interrupted_deployments_are_marked_error() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = engine(dir.path());
        let mut record = engine.plan(&spec(dir.path()), Status::Installing).unwrap().instance;
        record.name = "orphan".to_string();
        let id = record.id.clone();
        store.create_instance(record).unwrap();

        assert_eq!(engine.recover_interrupted().unwrap(), 1);
        assert_eq!(
            store.get_instance(&id).unwrap().unwrap().status,
            Status::Error
        );
    }

    #[test]
    fn plan_keeps_the_base_its_paths_were_resolved_against() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine(dir.path());
        let plan = engine.plan(&spec(dir.path()), Status::Pending).unwrap();
        assert_eq!(plan.path_base, dir.path());
        assert_eq!(plan.instance.install_path, dir.path().join("bots").join("bot1"));
        assert_eq!(plan.services[0].path, dir.path().join("bots").join("bot1").join("svc"));
    }

    #[test]
    fn catalog_defaults_fill_service_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, engine) = engine(dir.path());
        let svc = ServiceSpec {
            name: "nonebot-ada".to_string(),
            path: "ada".to_string(),
            port: 9001,
            run_command: None,
            install_command: None,
            source: None,
        };
        let planned = engine.plan_service(&svc, dir.path()).unwrap();
        assert_eq!(planned.run_command, "nb run");
        assert_eq!(planned.path, dir.path().join("ada"));
        assert_eq!(engine.available_services().len(), 2);
    }
}
