//! Per-container supervisor.

use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mydocker_cgroups::{Cgroup, Controller, ResourceLimits};
use mydocker_error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tokio::sync::watch;

use crate::pty::Pty;
use crate::spawn::{self, ChildIo, INIT_BINARY};
use crate::state::ContainerId;

/// How long a graceful stop waits before escalating to SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Supervises one container: the child process, its cgroup, and (in
/// attached mode) the PTY master.
///
/// The daemon registry exclusively owns the runner for the container's
/// lifetime; the monitor task and hijacked I/O sessions hold shared
/// references. `wait` performs the single real `waitpid` and publishes the
/// exit status through a watch channel; every other waiter observes that
/// channel, so the child is reaped exactly once.
#[derive(Debug)]
pub struct Runner {
    id: ContainerId,
    command: Vec<String>,
    rootfs: PathBuf,
    cgroup: Cgroup,
    detach: bool,
    pid: Mutex<Option<Pid>>,
    pty_master: Mutex<Option<Arc<OwnedFd>>>,
    exit_tx: watch::Sender<Option<i32>>,
}

impl Runner {
    /// Creates a runner and builds its cgroup.
    ///
    /// Validates the command and root directory, creates the cgroup with
    /// the cpu/memory/pids controllers, and applies the caps. A failure
    /// applying caps destroys the partially-built cgroup before surfacing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty command or missing
    /// rootfs, [`Error::Kernel`] for cgroup failures.
    pub fn new(
        id: &ContainerId,
        command: &[String],
        rootfs: &Path,
        limits: &ResourceLimits,
        detach: bool,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::validation("command cannot be empty"));
        }
        if !rootfs.is_dir() {
            return Err(Error::validation(format!(
                "rootfs directory doesn't exist: {}",
                rootfs.display()
            )));
        }

        let cgroup = Cgroup::new(
            id.as_str(),
            vec![Controller::Cpu, Controller::Memory, Controller::Pids],
        );
        cgroup.create()?;
        if let Err(e) = cgroup.apply_limits(limits) {
            if let Err(del_err) = cgroup.delete() {
                tracing::warn!(container = %id, "failed to roll back cgroup: {del_err}");
            }
            return Err(e);
        }

        let (exit_tx, _) = watch::channel(None);

        Ok(Self {
            id: id.clone(),
            command: command.to_vec(),
            rootfs: rootfs.to_path_buf(),
            cgroup,
            detach,
            pid: Mutex::new(None),
            pty_master: Mutex::new(None),
            exit_tx,
        })
    }

    /// Starts the container process.
    ///
    /// Spawns `container-init` (located next to the daemon executable)
    /// inside fresh namespaces, then writes the child pid into the cgroup.
    /// If the cgroup write fails the child is killed and reaped before the
    /// error surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] when the init binary is missing or the
    /// clone fails, [`Error::Kernel`] when the cgroup rejects the pid.
    pub fn start(&self) -> Result<i32> {
        let init_path = init_binary_path()?;

        let pid = if self.detach {
            let null = File::open("/dev/null")
                .map_err(|e| Error::spawn(format!("failed to open /dev/null: {e}")))?;
            let io = ChildIo::Detached {
                null: null.as_raw_fd(),
            };
            spawn::spawn_init(&init_path, &self.command, &self.rootfs, &io)?
        } else {
            let pty = Pty::open()?;
            let io = ChildIo::Pty {
                slave: pty.slave_fd(),
            };
            let pid = spawn::spawn_init(&init_path, &self.command, &self.rootfs, &io)?;
            // The child owns its copy of the slave now; keep only the
            // master so hangup propagates when it is closed.
            *self.pty_master.lock().expect("pty lock poisoned") =
                Some(Arc::new(pty.into_master()));
            pid
        };

        if let Err(e) = self.cgroup.add_process(pid.as_raw()) {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
            return Err(e);
        }

        *self.pid.lock().expect("pid lock poisoned") = Some(pid);
        Ok(pid.as_raw())
    }

    /// Container ID.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Child pid, or 0 when not started.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
            .lock()
            .expect("pid lock poisoned")
            .map_or(0, Pid::as_raw)
    }

    /// Whether the runner was started detached.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detach
    }

    /// Shared handle on the PTY master, if attached.
    #[must_use]
    pub fn pty_master(&self) -> Option<Arc<OwnedFd>> {
        self.pty_master.lock().expect("pty lock poisoned").clone()
    }

    /// Drops the runner's reference to the PTY master.
    ///
    /// Once every handle is gone the kernel closes the master and delivers
    /// SIGHUP to the child's session.
    pub fn close_pty(&self) {
        self.pty_master.lock().expect("pty lock poisoned").take();
    }

    /// Reaps the child and publishes its exit status.
    ///
    /// Must be called exactly once, by the monitor task. Returns the exit
    /// code (128+signal for signal deaths, −1 when the wait itself fails).
    pub async fn wait(&self) -> i32 {
        let Some(pid) = *self.pid.lock().expect("pid lock poisoned") else {
            return -1;
        };

        let status = tokio::task::spawn_blocking(move || waitpid(pid, None)).await;
        let code = match status {
            Ok(Ok(WaitStatus::Exited(_, code))) => code,
            Ok(Ok(WaitStatus::Signaled(_, signal, _))) => 128 + signal as i32,
            Ok(Ok(other)) => {
                tracing::warn!(container = %self.id, "unexpected wait status: {other:?}");
                -1
            }
            Ok(Err(e)) => {
                tracing::warn!(container = %self.id, "waitpid failed: {e}");
                -1
            }
            Err(e) => {
                tracing::warn!(container = %self.id, "wait task failed: {e}");
                -1
            }
        };

        // send_replace stores the value even when no waiter has
        // subscribed yet; a plain send would drop it.
        self.exit_tx.send_replace(Some(code));
        code
    }

    /// Waits for the monitor to publish the child's exit status.
    pub async fn wait_exited(&self) -> i32 {
        let mut rx = self.exit_tx.subscribe();
        loop {
            if let Some(code) = *rx.borrow_and_update() {
                return code;
            }
            if rx.changed().await.is_err() {
                return -1;
            }
        }
    }

    /// Sends a signal to the child. A child that is already gone counts as
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the container was never started.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        let Some(pid) = *self.pid.lock().expect("pid lock poisoned") else {
            return Err(Error::invalid_state("container not started"));
        };
        match kill(pid, signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::internal(format!(
                "failed to signal pid {pid}: {e}"
            ))),
        }
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Only signals; the monitor task performs the state transition.
    ///
    /// # Errors
    ///
    /// Returns an error if a signal cannot be delivered.
    pub async fn stop_with_timeout(&self, grace: Duration) -> Result<()> {
        self.signal(Signal::SIGTERM)?;
        if tokio::time::timeout(grace, self.wait_exited())
            .await
            .is_err()
        {
            tracing::info!(container = %self.id, "did not stop gracefully, sending SIGKILL");
            self.signal(Signal::SIGKILL)?;
        }
        Ok(())
    }

    /// Releases the container's resources: the PTY master (if any) and the
    /// cgroup. Runs exactly once per container, in the monitor; tolerates
    /// resources that are already gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if the cgroup exists but cannot be
    /// removed.
    pub fn cleanup(&self) -> Result<()> {
        self.close_pty();
        self.cgroup.delete()
    }
}

fn init_binary_path() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::spawn(format!("failed to resolve executable path: {e}")))?;
    let dir = exe
        .parent()
        .ok_or_else(|| Error::spawn("executable has no parent directory"))?;
    let path = dir.join(INIT_BINARY);
    if !path.exists() {
        return Err(Error::spawn(format!(
            "{INIT_BINARY} binary not found at {}",
            path.display()
        )));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_id() -> ContainerId {
        ContainerId::new()
    }

    #[test]
    fn empty_command_is_rejected() {
        let rootfs = TempDir::new().unwrap();
        let err = Runner::new(
            &test_id(),
            &[],
            rootfs.path(),
            &ResourceLimits::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn missing_rootfs_is_rejected() {
        let err = Runner::new(
            &test_id(),
            &["/bin/true".to_string()],
            Path::new("/nonexistent/rootfs"),
            &ResourceLimits::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn wait_exited_observes_published_status() {
        let (exit_tx, _) = watch::channel(None);
        let runner = Runner {
            id: test_id(),
            command: vec!["/bin/true".to_string()],
            rootfs: PathBuf::from("/tmp"),
            cgroup: Cgroup::with_root(
                Path::new("/tmp"),
                "wait-test",
                vec![Controller::Cpu],
            ),
            detach: true,
            pid: Mutex::new(None),
            pty_master: Mutex::new(None),
            exit_tx,
        };

        runner.exit_tx.send_replace(Some(0));
        assert_eq!(runner.wait_exited().await, 0);
    }
}
