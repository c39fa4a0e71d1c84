//! In-memory deployment progress, keyed by instance id.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::types::{DeploymentSnapshot, ServiceProgress};
use crate::store::Status;

#[derive(Debug)]
struct DeploymentTask {
    snapshot: DeploymentSnapshot,
    finished_at: Option<Instant>,
}

pub(crate) struct TaskRegistry {
    tasks: RwLock<HashMap<String, DeploymentTask>>,
    retention: Duration,
}

impl TaskRegistry {
    pub(crate) fn new(retention: Duration) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub(crate) fn insert<'a, I>(&self, instance_id: &str, services: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let services = services
            .into_iter()
            .map(|name| ServiceProgress {
                name: name.to_string(),
                status: Status::Pending,
                progress: 0,
                message: "Waiting".to_string(),
            })
            .collect();
        let task = DeploymentTask {
            snapshot: DeploymentSnapshot {
                instance_id: instance_id.to_string(),
                status: Status::Pending,
                progress: 0,
                message: "Deployment queued".to_string(),
                services,
                terminal: false,
            },
            finished_at: None,
        };
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(instance_id.to_string(), task);
    }

    fn update(&self, instance_id: &str, f: impl FnOnce(&mut DeploymentTask)) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.get_mut(instance_id) {
            if task.finished_at.is_none() {
                f(task);
            }
        }
    }

    pub(crate) fn set_progress(&self, instance_id: &str, status: Status, progress: u8, message: &str) {
        log::info!("Deploy {} [{}%] {}", instance_id, progress, message);
        self.update(instance_id, |task| {
            task.snapshot.status = status;
            task.snapshot.progress = progress.min(100);
            task.snapshot.message = message.to_string();
        });
    }

    pub(crate) fn set_service(
        &self,
        instance_id: &str,
        service: &str,
        status: Status,
        progress: u8,
        message: &str,
    ) {
        log::info!(
            "Deploy {} service {} [{}%] {}",
            instance_id,
            service,
            progress,
            message
        );
        self.update(instance_id, |task| {
            if let Some(entry) = task.snapshot.services.iter_mut().find(|s| s.name == service) {
                entry.status = status;
                entry.progress = progress.min(100);
                entry.message = message.to_string();
            }
        });
    }

    /// Mark the task terminal. Later updates are ignored.
    pub(crate) fn finish(&self, instance_id: &str, status: Status, message: &str) {
        self.update(instance_id, |task| {
            task.snapshot.status = status;
            task.snapshot.message = message.to_string();
            task.snapshot.terminal = true;
            if status != Status::Error {
                task.snapshot.progress = 100;
            }
            task.finished_at = Some(Instant::now());
        });
    }

    fn is_expired(&self, task: &DeploymentTask, now: Instant) -> bool {
        task.finished_at
            .is_some_and(|at| now.duration_since(at) >= self.retention)
    }

    pub(crate) fn snapshot(&self, instance_id: &str) -> Option<DeploymentSnapshot> {
        let now = Instant::now();
        {
            let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
            let task = tasks.get(instance_id)?;
            if !self.is_expired(task, now) {
                return Some(task.snapshot.clone());
            }
        }
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if tasks.get(instance_id).is_some_and(|t| self.is_expired(t, now)) {
            tasks.remove(instance_id);
        }
        None
    }

    pub(crate) fn contains(&self, instance_id: &str) -> bool {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.contains_key(instance_id)
    }

    /// A task exists and has not reached a terminal state.
    pub(crate) fn is_active(&self, instance_id: &str) -> bool {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(instance_id)
            .is_some_and(|t| t.finished_at.is_none())
    }

    /// Evict terminal tasks older than the retention window.
    pub(crate) fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let before = tasks.len();
        tasks.retain(|_, task| !self.is_expired(task, now));
        before - tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_service_progress_independently() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        registry.insert("abc", ["napcat", "ada"]);
        registry.set_service("abc", "napcat", Status::Stopped, 100, "Ready");
        registry.set_service("abc", "ada", Status::Error, 0, "clone failed");

        let snap = registry.snapshot("abc").unwrap();
        assert_eq!(snap.services[0].progress, 100);
        assert_eq!(snap.services[1].status, Status::Error);
        assert!(registry.is_active("abc"));
    }

    #[test]
    fn terminal_tasks_ignore_updates() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        registry.insert("abc", []);
        registry.finish("abc", Status::Stopped, "done");
        registry.set_progress("abc", Status::Installing, 10, "late");

        let snap = registry.snapshot("abc").unwrap();
        assert!(snap.terminal);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.message, "done");
        assert!(!registry.is_active("abc"));
    }

    #[test]
    fn expired_tasks_are_evicted() {
        let registry = TaskRegistry::new(Duration::ZERO);
        registry.insert("done", []);
        registry.insert("running", []);
        registry.finish("done", Status::Error, "boom");

        assert_eq!(registry.sweep(), 1);
        assert!(!registry.contains("done"));
        assert!(registry.snapshot("running").is_some());
    }

    #[test]
    fn reads_evict_lazily() {
        let registry = TaskRegistry::new(Duration::ZERO);
        registry.insert("done", []);
        registry.finish("done", Status::Stopped, "ok");
        assert!(registry.snapshot("done").is_none());
        assert!(!registry.contains("done"));
    }
}
