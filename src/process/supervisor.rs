//! Supervised processes, one per (instance, role) target.
//!
//! The target map is the live truth; every transition is written through to the
//! store before the operation returns. Start, stop and restart of one target are
//! serialized by a per-target async lock, so unrelated targets never wait on each
//! other.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, watch};

use super::command::shell_command;
use super::control::{check_port_available, force_kill, graceful_signal};
use super::lines::LineSplitter;
use super::MAIN_ROLE;
use crate::config::SupervisorConfig;
use crate::error::{AppError, Result};
use crate::session::{session_key, InputSink, Multiplexer, OutputStream};
use crate::store::{Status, Store};

/// Pending stdin writes per target before input is refused.
const STDIN_QUEUE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub instance_id: String,
    pub role: String,
}

impl TargetKey {
    pub fn new(instance_id: &str, role: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            role: role.to_string(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.role == MAIN_ROLE
    }

    pub fn session_key(&self) -> String {
        session_key(&self.instance_id, &self.role)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.role)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Launch failed or a stop could not confirm termination.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub state: TargetState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}

/// How a successful stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Graceful,
    /// The grace period ran out and the process was killed.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceStats {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
}

struct LiveProcess {
    pid: u32,
    generation: u64,
    started_at: DateTime<Utc>,
    stdin: mpsc::Sender<Vec<u8>>,
    exited: watch::Receiver<bool>,
}

#[derive(Default)]
struct TargetEntry {
    state: TargetState,
    live: Option<LiveProcess>,
    last_exit_code: Option<i32>,
}

/// A spawned child whose exit is not watched yet.
struct Launched {
    pid: u32,
    child: Child,
    exited_tx: watch::Sender<bool>,
    generation: u64,
}

struct LaunchSpec {
    command: String,
    dir: PathBuf,
    port: u16,
}

type TargetMap = Arc<RwLock<HashMap<TargetKey, TargetEntry>>>;

pub struct Supervisor {
    store: Arc<dyn Store>,
    sessions: Arc<Multiplexer>,
    targets: TargetMap,
    locks: Mutex<HashMap<TargetKey, Arc<tokio::sync::Mutex<()>>>>,
    generation: AtomicU64,
    grace_period: Duration,
    kill_timeout: Duration,
}

impl Supervisor {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<Multiplexer>, config: &SupervisorConfig) -> Self {
        Self {
            store,
            sessions,
            targets: Arc::new(RwLock::new(HashMap::new())),
            locks: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            grace_period: config.grace_period(),
            kill_timeout: config.kill_timeout(),
        }
    }

    fn target_lock(&self, key: &TargetKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn set_state(&self, key: &TargetKey, state: TargetState) {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        targets.entry(key.clone()).or_default().state = state;
    }

    fn persist(&self, key: &TargetKey, status: Status) -> Result<()> {
        persist_status(self.store.as_ref(), key, status)
    }

    /// Start one target. Returns the new PID.
    pub async fn start(&self, instance_id: &str, role: &str) -> Result<u32> {
        let key = TargetKey::new(instance_id, role);
        let lock = self.target_lock(&key);
        let _guard = lock.lock().await;
        self.start_locked(&key)
    }

    fn start_locked(&self, key: &TargetKey) -> Result<u32> {
        {
            let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = targets.get(key) {
                if entry.live.is_some() || entry.state == TargetState::Starting {
                    return Err(AppError::invalid_state(format!(
                        "{} is already {}",
                        key,
                        if entry.state == TargetState::Error {
                            "holding an unconfirmed process"
                        } else {
                            "running"
                        }
                    )));
                }
            }
        }

        let launch = self.resolve_launch(key)?;
        check_port_available(launch.port)?;
        self.set_state(key, TargetState::Starting);

        match self.spawn(key, &launch) {
            Ok(launched) => {
                let pid = launched.pid;
                log::info!("Started {} (pid: {}, port: {})", key, pid, launch.port);
                self.sessions.publish_status(
                    &key.session_key(),
                    format!("Process started (pid {})", pid),
                );
                // Recorded before the reaper exists so an early exit cannot be overwritten.
                let persisted = self.persist(key, Status::Running);
                self.watch_exit(key, launched);
                persisted.map(|()| pid)
            }
            Err(e) => {
                log::error!("Failed to start {}: {}", key, e);
                self.set_state(key, TargetState::Error);
                if let Err(store_err) = self.persist(key, Status::Error) {
                    log::error!("Failed to record error status for {}: {}", key, store_err);
                }
                self.sessions
                    .publish_status(&key.session_key(), format!("Start failed: {}", e.message()));
                Err(e)
            }
        }
    }

    fn resolve_launch(&self, key: &TargetKey) -> Result<LaunchSpec> {
        let instance = self
            .store
            .get_instance(&key.instance_id)?
            .ok_or_else(|| AppError::instance_not_found(&key.instance_id))?;
        if instance.status.is_deploying() {
            return Err(AppError::invalid_state(format!(
                "Instance {} is still being deployed",
                key.instance_id
            )));
        }

        let launch = if key.is_main() {
            LaunchSpec {
                command: instance.run_command,
                dir: instance.install_path,
                port: instance.port,
            }
        } else {
            let service = self
                .store
                .list_services(&key.instance_id)?
                .into_iter()
                .find(|s| s.name == key.role)
                .ok_or_else(|| AppError::service_not_found(&key.instance_id, &key.role))?;
            LaunchSpec {
                command: service.run_command,
                dir: service.path,
                port: service.port,
            }
        };

        if launch.command.trim().is_empty() {
            return Err(AppError::external(format!("{} declares no run command", key)));
        }
        Ok(launch)
    }

    fn spawn(&self, key: &TargetKey, launch: &LaunchSpec) -> Result<Launched> {
        if !launch.dir.is_dir() {
            return Err(AppError::external(format!(
                "Working directory {} does not exist",
                launch.dir.display()
            )));
        }

        let mut cmd = shell_command(&launch.command, &launch.dir);
        cmd.env("BOT_INSTANCE_ID", &key.instance_id)
            .env("BOT_ROLE", &key.role)
            .env("PORT", launch.port.to_string())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::external(format!("Failed to run `{}`: {}", launch.command, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::external("Process exited before its PID was read"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::external("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::external("Failed to capture stderr"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::external("Failed to open stdin"))?;

        let session = key.session_key();
        let label = format!("{} {}", key.instance_id, key.role);
        spawn_pump(
            Arc::clone(&self.sessions),
            session.clone(),
            label.clone(),
            OutputStream::Stdout,
            stdout,
        );
        spawn_pump(
            Arc::clone(&self.sessions),
            session,
            label.clone(),
            OutputStream::Stderr,
            stderr,
        );

        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_QUEUE);
        spawn_stdin_writer(stdin, stdin_rx, label);

        let (exited_tx, exited_rx) = watch::channel(false);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
            targets.insert(
                key.clone(),
                TargetEntry {
                    state: TargetState::Running,
                    live: Some(LiveProcess {
                        pid,
                        generation,
                        started_at: Utc::now(),
                        stdin: stdin_tx,
                        exited: exited_rx,
                    }),
                    last_exit_code: None,
                },
            );
        }

        Ok(Launched {
            pid,
            child,
            exited_tx,
            generation,
        })
    }

    fn watch_exit(&self, key: &TargetKey, launched: Launched) {
        let Launched {
            mut child,
            exited_tx,
            generation,
            ..
        } = launched;
        let reaper = Reaper {
            targets: Arc::clone(&self.targets),
            store: Arc::clone(&self.store),
            sessions: Arc::clone(&self.sessions),
            key: key.clone(),
            generation,
        };
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(&status),
                Err(e) => {
                    log::error!("Failed to wait for {}: {}", reaper.key, e);
                    None
                }
            };
            reaper.on_exit(code);
            let _ = exited_tx.send(true);
        });
    }

    /// Stop one target: graceful signal, grace period, then forced kill.
    pub async fn stop(&self, instance_id: &str, role: &str) -> Result<StopOutcome> {
        let key = TargetKey::new(instance_id, role);
        let lock = self.target_lock(&key);
        let _guard = lock.lock().await;
        self.stop_locked(&key).await
    }

    async fn stop_locked(&self, key: &TargetKey) -> Result<StopOutcome> {
        let (pid, mut exited) = {
            let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = targets.get_mut(key) else {
                return Ok(StopOutcome::AlreadyStopped);
            };
            let Some(live) = &entry.live else {
                return Ok(StopOutcome::AlreadyStopped);
            };
            let handle = (live.pid, live.exited.clone());
            entry.state = TargetState::Stopping;
            handle
        };

        let session = key.session_key();
        self.sessions.publish_status(&session, "Stopping process");

        let mut forced = false;
        if !*exited.borrow() {
            let signalled = match graceful_signal(pid) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Graceful signal to {} failed: {}, forcing", key, e);
                    false
                }
            };
            if !signalled || !wait_for_exit(&mut exited, self.grace_period).await {
                log::warn!(
                    "{} (pid {}) did not exit within {}s, force killing",
                    key,
                    pid,
                    self.grace_period.as_secs()
                );
                forced = true;
                if let Err(e) = force_kill(pid) {
                    log::error!("Failed to force kill {}: {}", key, e);
                }
                if !wait_for_exit(&mut exited, self.kill_timeout).await {
                    self.set_state(key, TargetState::Error);
                    if let Err(store_err) = self.persist(key, Status::Error) {
                        log::error!("Failed to record error status for {}: {}", key, store_err);
                    }
                    self.sessions
                        .publish_status(&session, "Process could not be terminated");
                    return Err(AppError::timeout(format!(
                        "{} (pid {}) could not be confirmed stopped",
                        key, pid
                    )));
                }
            }
        }

        let code = {
            let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
            let entry = targets.entry(key.clone()).or_default();
            entry.live = None;
            entry.state = TargetState::Stopped;
            entry.last_exit_code
        };
        log::info!(
            "Stopped {}{} (exit code {:?})",
            key,
            if forced { " by force" } else { "" },
            code
        );
        self.sessions.publish_status(
            &session,
            if forced {
                "Process killed after grace period".to_string()
            } else {
                format!("Process stopped (exit code {})", format_code(code))
            },
        );
        self.persist(key, Status::Stopped)?;

        Ok(if forced {
            StopOutcome::Forced
        } else {
            StopOutcome::Graceful
        })
    }

    /// Stop then start one target. A stop that needed force, or could not confirm
    /// termination, fails with `Timeout` and nothing new is started.
    pub async fn restart(&self, instance_id: &str, role: &str) -> Result<u32> {
        let key = TargetKey::new(instance_id, role);
        let lock = self.target_lock(&key);
        let _guard = lock.lock().await;

        if self.stop_locked(&key).await? == StopOutcome::Forced {
            return Err(AppError::timeout(format!(
                "{} exceeded its grace period and was killed; not restarted",
                key
            )));
        }
        self.start_locked(&key)
    }

    /// Start every service that has a run command, then the main process.
    pub async fn start_instance(&self, instance_id: &str) -> Result<u32> {
        if self.store.get_instance(instance_id)?.is_none() {
            return Err(AppError::instance_not_found(instance_id));
        }
        let mut started = Vec::new();
        let result = self.start_roles(instance_id, &mut started).await;
        if let Err(e) = &result {
            self.roll_back(instance_id, &started, e).await;
        }
        result
    }

    async fn start_roles(&self, instance_id: &str, started: &mut Vec<String>) -> Result<u32> {
        for service in self.store.list_services(instance_id)? {
            if service.run_command.trim().is_empty() {
                log::info!(
                    "Service {} of instance {} has no run command, not starting it",
                    service.name,
                    instance_id
                );
                continue;
            }
            if self.target_status(instance_id, &service.name).state == TargetState::Running {
                continue;
            }
            self.start(instance_id, &service.name).await?;
            started.push(service.name);
        }
        self.start(instance_id, MAIN_ROLE).await
    }

    /// Stop the services a failed instance start brought up, newest first.
    async fn roll_back(&self, instance_id: &str, started: &[String], cause: &AppError) {
        if started.is_empty() {
            return;
        }
        log::warn!(
            "Instance {} failed to start ({}), stopping {} service(s) it started",
            instance_id,
            cause,
            started.len()
        );
        for role in started.iter().rev() {
            if let Err(e) = self.stop(instance_id, role).await {
                log::error!(
                    "Failed to stop {}/{} after a failed start, leaving it running: {}",
                    instance_id,
                    role,
                    e
                );
            }
        }
    }

    /// Stop the main process, then every service. Every target is attempted;
    /// the first failure is returned.
    pub async fn stop_instance(&self, instance_id: &str) -> Result<StopOutcome> {
        if self.store.get_instance(instance_id)?.is_none() {
            return Err(AppError::instance_not_found(instance_id));
        }
        let mut roles = vec![MAIN_ROLE.to_string()];
        roles.extend(
            self.store
                .list_services(instance_id)?
                .into_iter()
                .map(|s| s.name),
        );

        let mut first_error = None;
        let mut outcome = StopOutcome::AlreadyStopped;
        for role in roles {
            match self.stop(instance_id, &role).await {
                Ok(StopOutcome::AlreadyStopped) => {}
                Ok(StopOutcome::Forced) => outcome = StopOutcome::Forced,
                Ok(StopOutcome::Graceful) => {
                    if outcome == StopOutcome::AlreadyStopped {
                        outcome = StopOutcome::Graceful;
                    }
                }
                Err(e) => {
                    log::error!("Failed to stop {}/{}: {}", instance_id, role, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    pub async fn restart_instance(&self, instance_id: &str) -> Result<u32> {
        if self.stop_instance(instance_id).await? == StopOutcome::Forced {
            return Err(AppError::timeout(format!(
                "Instance {} exceeded its grace period and was killed; not restarted",
                instance_id
            )));
        }
        self.start_instance(instance_id).await
    }

    /// Counts by persisted status.
    pub fn list_status(&self) -> Result<InstanceStats> {
        let instances = self.store.list_instances()?;
        Ok(InstanceStats {
            total: instances.len(),
            running: instances
                .iter()
                .filter(|i| i.status == Status::Running)
                .count(),
            stopped: instances
                .iter()
                .filter(|i| i.status == Status::Stopped)
                .count(),
        })
    }

    pub fn target_status(&self, instance_id: &str, role: &str) -> TargetStatus {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        match targets.get(&TargetKey::new(instance_id, role)) {
            Some(entry) => TargetStatus {
                state: entry.state,
                pid: entry.live.as_ref().map(|l| l.pid),
                started_at: entry.live.as_ref().map(|l| l.started_at),
                last_exit_code: entry.last_exit_code,
            },
            None => TargetStatus {
                state: TargetState::Stopped,
                pid: None,
                started_at: None,
                last_exit_code: None,
            },
        }
    }

    /// True if any role of the instance has a live process.
    pub fn has_live_process(&self, instance_id: &str) -> bool {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets
            .iter()
            .any(|(key, entry)| key.instance_id == instance_id && entry.live.is_some())
    }

    /// Queue bytes for a target's stdin.
    pub fn write_input(&self, instance_id: &str, role: &str, data: Vec<u8>) -> Result<()> {
        let key = TargetKey::new(instance_id, role);
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        let live = targets
            .get(&key)
            .and_then(|entry| entry.live.as_ref())
            .ok_or_else(|| AppError::invalid_state(format!("{} is not running", key)))?;
        live.stdin.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::external(format!("Input queue for {} is full", key))
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::invalid_state(format!("{} no longer accepts input", key))
            }
        })
    }

    /// Stop every live target concurrently.
    pub async fn stop_all(&self) {
        let keys: Vec<TargetKey> = {
            let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
            targets
                .iter()
                .filter(|(_, entry)| entry.live.is_some())
                .map(|(key, _)| key.clone())
                .collect()
        };
        if keys.is_empty() {
            return;
        }
        log::info!("Stopping {} supervised processes", keys.len());

        let stops = keys.iter().map(|key| async move {
            if let Err(e) = self.stop(&key.instance_id, &key.role).await {
                log::error!("Failed to stop {} during shutdown: {}", key, e);
            }
        });
        futures_util::future::join_all(stops).await;
    }

    /// Persisted `running` records with no live process become `stopped`.
    pub fn reconcile_on_boot(&self) -> Result<usize> {
        let mut reconciled = 0;
        for instance in self.store.list_instances()? {
            if instance.status == Status::Running
                && !self.is_live(&TargetKey::new(&instance.id, MAIN_ROLE))
            {
                self.store
                    .update_instance_status(&instance.id, Status::Stopped)?;
                reconciled += 1;
            }
            for service in self.store.list_services(&instance.id)? {
                if service.status == Status::Running
                    && !self.is_live(&TargetKey::new(&instance.id, &service.name))
                {
                    self.store
                        .update_service_status(&instance.id, &service.name, Status::Stopped)?;
                    reconciled += 1;
                }
            }
        }
        if reconciled > 0 {
            log::info!("Reconciled {} stale running records to stopped", reconciled);
        }
        Ok(reconciled)
    }

    fn is_live(&self, key: &TargetKey) -> bool {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets.get(key).is_some_and(|entry| entry.live.is_some())
    }

    /// Forget the in-memory state of an instance whose processes are all gone.
    pub fn forget_instance(&self, instance_id: &str) {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        targets.retain(|key, entry| key.instance_id != instance_id || entry.live.is_some());
        drop(targets);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|key, _| key.instance_id != instance_id);
    }
}

impl InputSink for Supervisor {
    fn send_input(&self, instance_id: &str, role: &str, data: Vec<u8>) -> Result<()> {
        self.write_input(instance_id, role, data)
    }
}

fn persist_status(store: &dyn Store, key: &TargetKey, status: Status) -> Result<()> {
    if key.is_main() {
        store.update_instance_status(&key.instance_id, status)
    } else {
        store.update_service_status(&key.instance_id, &key.role, status)
    }
}

/// Exit handling for one launched process.
struct Reaper {
    targets: TargetMap,
    store: Arc<dyn Store>,
    sessions: Arc<Multiplexer>,
    key: TargetKey,
    generation: u64,
}

impl Reaper {
    /// Record the exit code. Outside an explicit stop the target is cleaned up
    /// here and persisted as `stopped`.
    fn on_exit(&self, code: Option<i32>) {
        let previous = {
            let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = targets.get_mut(&self.key) else {
                return;
            };
            if !entry
                .live
                .as_ref()
                .is_some_and(|live| live.generation == self.generation)
            {
                return;
            }
            entry.last_exit_code = code;
            if entry.state == TargetState::Stopping {
                return;
            }
            let previous = entry.state;
            entry.live = None;
            entry.state = TargetState::Stopped;
            previous
        };

        if previous == TargetState::Running {
            log::warn!("{} crashed (exit code {:?})", self.key, code);
            self.sessions.publish_status(
                &self.key.session_key(),
                format!("Process exited unexpectedly (exit code {})", format_code(code)),
            );
        } else {
            log::info!("{} exited after an unconfirmed stop (exit code {:?})", self.key, code);
        }
        if let Err(e) = persist_status(self.store.as_ref(), &self.key, Status::Stopped) {
            log::error!("Failed to record exit of {}: {}", self.key, e);
        }
    }
}

async fn wait_for_exit(exited: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, exited.wait_for(|done| *done)).await,
        Ok(Ok(_))
    )
}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt as _;

    status.code().or_else(|| status.signal().map(|signal| -signal))
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> Option<i32> {
    status.code()
}

fn format_code(code: Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Forward lines from a child stream into its session until EOF.
fn spawn_pump<R>(
    sessions: Arc<Multiplexer>,
    session: String,
    label: String,
    stream: OutputStream,
    mut reader: R,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new();
        let mut chunk = vec![0_u8; 8 * 1024];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.push(&chunk[..n]) {
                        log::debug!("[{} {}] {}", label, stream.as_str(), line);
                        sessions.publish(&session, stream, line);
                    }
                }
                Err(e) => {
                    log::warn!("[{} {}] read failed: {}", label, stream.as_str(), e);
                    break;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            log::debug!("[{} {}] {}", label, stream.as_str(), line);
            sessions.publish(&session, stream, line);
        }
    });
}

fn spawn_stdin_writer(mut stdin: ChildStdin, mut rx: mpsc::Receiver<Vec<u8>>, label: String) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                log::debug!("[{}] stdin closed: {}", label, e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                log::debug!("[{}] stdin flush failed: {}", label, e);
                break;
            }
        }
    });
}
