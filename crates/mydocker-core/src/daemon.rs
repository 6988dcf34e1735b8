//! The daemon state machine.
//!
//! Owns the container registry: two maps keyed by container id, one for
//! persisted records and one for live runners, guarded by a single
//! reader-writer lock. Handlers copy what they need out of the registry,
//! release the lock, and perform blocking work (spawn, signal, wait)
//! outside it. The per-container monitor task is the sole writer of the
//! running→exited transition; `stop` only signals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use mydocker_cgroups::ResourceLimits;
use mydocker_container::runner::STOP_GRACE_PERIOD;
use mydocker_container::{ContainerId, ContainerRecord, Runner};
use mydocker_error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::store::ContainerStore;

/// Parameters for creating a container.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Absolute path of the prepared root directory.
    pub rootfs: PathBuf,
    /// Resource caps.
    pub limits: ResourceLimits,
    /// Detached (background) mode; attached mode allocates a PTY.
    pub detach: bool,
}

#[derive(Default)]
struct Registry {
    containers: HashMap<String, ContainerRecord>,
    runners: HashMap<String, Arc<Runner>>,
}

/// The container daemon.
///
/// A record is on disk iff it is in the in-memory map; a runner exists iff
/// the corresponding record has status running.
pub struct Daemon {
    store: ContainerStore,
    registry: RwLock<Registry>,
}

impl Daemon {
    /// Creates the daemon, loading and reconciling persisted containers.
    ///
    /// Records left in `running` status by a previous daemon are reduced
    /// to `exited` — the daemon does not inherit running children, and
    /// re-attach is not supported.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be prepared or read.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = ContainerStore::new(data_dir)?;

        let mut registry = Registry::default();
        let records = store.list()?;
        let count = records.len();
        for mut record in records {
            if record.is_running() {
                let alive = record.pid > 0 && kill(Pid::from_raw(record.pid), None).is_ok();
                if alive {
                    tracing::warn!(
                        container = %record.id,
                        pid = record.pid,
                        "process is still running, marking exited (re-attach not supported)"
                    );
                } else {
                    tracing::warn!(
                        container = %record.id,
                        pid = record.pid,
                        "process is dead, marking exited"
                    );
                }
                record.mark_exited();
                if let Err(e) = store.save(&record) {
                    tracing::warn!(container = %record.id, "failed to update container state: {e}");
                }
            }
            registry.containers.insert(record.id.to_string(), record);
        }
        tracing::info!("loaded {count} container(s) from disk");

        Ok(Self {
            store,
            registry: RwLock::new(registry),
        })
    }

    /// Generates a container id that is unused within this daemon.
    fn generate_id(&self) -> Result<ContainerId> {
        let registry = self.read_registry()?;
        loop {
            let id = ContainerId::new();
            if !registry.containers.contains_key(id.as_str()) {
                return Ok(id);
            }
        }
    }

    /// Creates and starts a container.
    ///
    /// On success the container is running, registered, persisted, and
    /// monitored; for attached containers the runner is returned so the
    /// request surface can bridge its PTY. Any failure along the
    /// start/cgroup path leaves the record persisted in `exited` status.
    ///
    /// # Errors
    ///
    /// Surfaces validation, cgroup, and spawn failures.
    pub async fn create_container(
        self: &Arc<Self>,
        opts: CreateOptions,
    ) -> Result<(ContainerId, Option<Arc<Runner>>)> {
        let id = self.generate_id()?;
        let record = ContainerRecord::new(
            id.clone(),
            opts.command.clone(),
            opts.rootfs.clone(),
            opts.limits,
        );
        self.add_container(record)?;
        tracing::info!(container = %id, "created container");

        let runner = match Runner::new(&id, &opts.command, &opts.rootfs, &opts.limits, opts.detach)
        {
            Ok(runner) => Arc::new(runner),
            Err(e) => {
                self.mark_exited(&id);
                return Err(e);
            }
        };

        let pid = match runner.start() {
            Ok(pid) => pid,
            Err(e) => {
                if let Err(cleanup_err) = runner.cleanup() {
                    tracing::warn!(container = %id, "cleanup after failed start: {cleanup_err}");
                }
                self.mark_exited(&id);
                return Err(e);
            }
        };

        if let Err(e) = self.set_running(&id, pid, Arc::clone(&runner)) {
            // The child is up but its state cannot be persisted; take it
            // back down and reap it off the request path.
            let _ = runner.signal(Signal::SIGKILL);
            let reaper = Arc::clone(&runner);
            tokio::spawn(async move {
                reaper.wait().await;
                let _ = reaper.cleanup();
            });
            self.mark_exited(&id);
            return Err(e);
        }

        tracing::info!(container = %id, pid, "started container");

        let daemon = Arc::clone(self);
        let monitor_runner = Arc::clone(&runner);
        let monitor_id = id.clone();
        tokio::spawn(async move {
            daemon.monitor(monitor_id, monitor_runner).await;
        });

        let runner = (!opts.detach).then_some(runner);
        Ok((id, runner))
    }

    /// Waits for one container to exit and retires it.
    ///
    /// This task is the only writer of the running→exited transition.
    async fn monitor(self: Arc<Self>, id: ContainerId, runner: Arc<Runner>) {
        let code = runner.wait().await;
        tracing::info!(container = %id, exit_code = code, "container exited");

        self.mark_exited(&id);
        if let Err(e) = runner.cleanup() {
            tracing::error!(container = %id, "cleanup failed: {e}");
        }
        self.remove_runner(&id);
    }

    /// Stops a running container: SIGTERM, a 5 s grace period, then
    /// SIGKILL. The monitor performs the actual state transition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown container and
    /// [`Error::InvalidState`] if it is not running.
    pub async fn stop_container(&self, id: &str) -> Result<()> {
        let runner = {
            let registry = self.read_registry()?;
            let record = registry
                .containers
                .get(id)
                .ok_or_else(|| Error::not_found(format!("container not found: {id}")))?;
            if !record.is_running() {
                return Err(Error::invalid_state(format!(
                    "container is not running (status: {})",
                    record.status
                )));
            }
            registry
                .runners
                .get(id)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("runner not found for container: {id}")))?
        };

        tracing::info!(container = %id, pid = runner.pid(), "sending SIGTERM");
        runner.stop_with_timeout(STOP_GRACE_PERIOD).await
    }

    /// Snapshot of all container records.
    #[must_use]
    pub fn list_containers(&self) -> Vec<ContainerRecord> {
        self.registry
            .read()
            .map(|registry| {
                let mut records: Vec<ContainerRecord> =
                    registry.containers.values().cloned().collect();
                records.sort_by_key(|r| r.created);
                records
            })
            .unwrap_or_default()
    }

    /// Looks up one container record.
    #[must_use]
    pub fn get_container(&self, id: &str) -> Option<ContainerRecord> {
        self.registry.read().ok()?.containers.get(id).cloned()
    }

    /// Stops all running containers and waits briefly for their monitors
    /// to persist the final states.
    pub async fn shutdown(&self) {
        let runners: Vec<(String, Arc<Runner>)> = match self.registry.read() {
            Ok(registry) => registry
                .runners
                .iter()
                .map(|(id, runner)| (id.clone(), Arc::clone(runner)))
                .collect(),
            Err(_) => Vec::new(),
        };

        for (id, runner) in runners {
            tracing::info!(container = %id, "stopping container");
            if let Err(e) = runner.stop_with_timeout(STOP_GRACE_PERIOD).await {
                tracing::warn!(container = %id, "failed to stop container: {e}");
            }
        }

        // Monitors own the exited transition and cleanup; give them a
        // moment so states land on disk before the process exits.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let drained = self
                .registry
                .read()
                .map(|registry| registry.runners.is_empty())
                .unwrap_or(true);
            if drained || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn read_registry(&self) -> Result<std::sync::RwLockReadGuard<'_, Registry>> {
        self.registry
            .read()
            .map_err(|_| Error::internal("registry lock poisoned"))
    }

    fn write_registry(&self) -> Result<std::sync::RwLockWriteGuard<'_, Registry>> {
        self.registry
            .write()
            .map_err(|_| Error::internal("registry lock poisoned"))
    }

    /// Inserts a record into the registry and persists it; a failed disk
    /// write rolls the insert back.
    fn add_container(&self, record: ContainerRecord) -> Result<()> {
        let mut registry = self.write_registry()?;
        let id = record.id.to_string();
        let snapshot = record.clone();
        registry.containers.insert(id.clone(), record);

        if let Err(e) = self.store.save(&snapshot) {
            registry.containers.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Flips a record to running and registers its runner. The runner is
    /// only registered once the record is safely on disk.
    fn set_running(&self, id: &ContainerId, pid: i32, runner: Arc<Runner>) -> Result<()> {
        let mut registry = self.write_registry()?;
        let record = registry
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| Error::not_found(format!("container not found: {id}")))?;

        record.pid = pid;
        record.status = mydocker_container::ContainerStatus::Running;
        let snapshot = record.clone();
        self.store.save(&snapshot)?;

        registry.runners.insert(id.to_string(), runner);
        Ok(())
    }

    /// Reduces a record to exited/pid 0 and persists it. Persistence
    /// failures are logged; the in-memory transition always happens.
    fn mark_exited(&self, id: &ContainerId) {
        let Ok(mut registry) = self.registry.write() else {
            return;
        };
        if let Some(record) = registry.containers.get_mut(id.as_str()) {
            record.mark_exited();
            let snapshot = record.clone();
            if let Err(e) = self.store.save(&snapshot) {
                tracing::warn!(container = %id, "failed to persist exited state: {e}");
            }
        }
    }

    fn remove_runner(&self, id: &ContainerId) {
        if let Ok(mut registry) = self.registry.write() {
            registry.runners.remove(id.as_str());
        }
    }
}
