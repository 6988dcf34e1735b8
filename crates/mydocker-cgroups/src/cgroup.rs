//! Per-container control-group handle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mydocker_error::{Error, Result};

use crate::limits::ResourceLimits;

/// Default mount point of the cgroup pseudo-filesystem.
const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// A cgroup controller (subsystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Cpu,
    Memory,
    Pids,
}

impl Controller {
    /// Kernel name of the controller.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Pids => "pids",
        }
    }
}

/// Detected cgroup hierarchy flavor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Layout {
    /// Unified v2 hierarchy: one directory under the cgroup root.
    Unified(PathBuf),
    /// Split v1 hierarchy: one directory per controller.
    Split(PathBuf),
}

/// Handle on one container's control group.
///
/// The directory (or per-controller directories) exists between
/// [`Cgroup::create`] and [`Cgroup::delete`]; [`Cgroup::add_process`] may
/// only be called in between.
#[derive(Debug, Clone)]
pub struct Cgroup {
    name: String,
    controllers: Vec<Controller>,
    layout: Layout,
}

impl Cgroup {
    /// Creates a handle for the named container on the host hierarchy.
    ///
    /// Probes for the v2 unified marker (`cgroup.controllers` at the root);
    /// absent that, each controller gets its own v1 directory. Nothing is
    /// created on disk until [`Cgroup::create`].
    #[must_use]
    pub fn new(name: &str, controllers: Vec<Controller>) -> Self {
        Self::with_root(Path::new(DEFAULT_CGROUP_ROOT), name, controllers)
    }

    /// Creates a handle rooted at an explicit hierarchy mount point.
    ///
    /// Used by tests to point the handle at a scratch directory.
    #[must_use]
    pub fn with_root(root: &Path, name: &str, controllers: Vec<Controller>) -> Self {
        let name = format!("mydocker-{}", sanitize(name));
        let layout = if root.join("cgroup.controllers").exists() {
            Layout::Unified(root.join(&name))
        } else {
            Layout::Split(root.to_path_buf())
        };
        Self {
            name,
            controllers,
            layout,
        }
    }

    /// Sanitized cgroup name (`mydocker-<id>`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem paths of the cgroup directories.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        match &self.layout {
            Layout::Unified(path) => vec![path.clone()],
            Layout::Split(root) => self
                .controllers
                .iter()
                .map(|c| root.join(c.as_str()).join(&self.name))
                .collect(),
        }
    }

    /// Creates the cgroup directory (v2) or per-controller directories (v1).
    ///
    /// On v2, controller propagation through `cgroup.subtree_control` is
    /// attempted but failure there is non-fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if a directory cannot be created.
    pub fn create(&self) -> Result<()> {
        match &self.layout {
            Layout::Unified(path) => {
                fs::create_dir_all(path).map_err(|e| {
                    Error::kernel(format!(
                        "failed to create unified cgroup {}: {e}",
                        path.display()
                    ))
                })?;

                let enable: String = self
                    .controllers
                    .iter()
                    .map(|c| format!("+{}", c.as_str()))
                    .collect::<Vec<_>>()
                    .join(" ");
                if let Err(e) = fs::write(path.join("cgroup.subtree_control"), enable) {
                    tracing::debug!(
                        cgroup = %self.name,
                        "could not enable subtree controllers: {e}"
                    );
                }
                Ok(())
            }
            Layout::Split(_) => {
                for path in self.paths() {
                    fs::create_dir_all(&path).map_err(|e| {
                        Error::kernel(format!(
                            "failed to create cgroup {}: {e}",
                            path.display()
                        ))
                    })?;
                }
                Ok(())
            }
        }
    }

    /// Writes `pid` into the cgroup's process-entry file(s).
    ///
    /// On v1 each controller gets its own copy; all-or-nothing is not
    /// guaranteed and the last error is reported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if a `cgroup.procs` write fails.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        let mut last_err = None;
        for path in self.paths() {
            let procs = path.join("cgroup.procs");
            if let Err(e) = fs::write(&procs, pid.to_string()) {
                last_err = Some(Error::kernel(format!(
                    "failed to add pid {pid} to {}: {e}",
                    procs.display()
                )));
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Applies the resource caps, skipping zero/default values.
    ///
    /// Swap caps rejected by the kernel are logged and ignored; swap
    /// accounting is not always compiled in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] on the first failed non-swap write.
    pub fn apply_limits(&self, limits: &ResourceLimits) -> Result<()> {
        self.apply_cpu_limits(limits)?;
        self.apply_memory_limits(limits)?;
        if limits.pids_limit > 0 {
            self.apply_pids_limit(limits)?;
        }
        Ok(())
    }

    fn apply_cpu_limits(&self, limits: &ResourceLimits) -> Result<()> {
        match &self.layout {
            Layout::Unified(path) => {
                if limits.cpu_shares > 0 {
                    let weight = cpu_weight_from_shares(limits.cpu_shares);
                    write_cap(&path.join("cpu.weight"), &weight.to_string())?;
                }
                if limits.cpu_quota > 0 {
                    let period = if limits.cpu_period == 0 {
                        100_000
                    } else {
                        limits.cpu_period
                    };
                    write_cap(
                        &path.join("cpu.max"),
                        &format!("{} {period}", limits.cpu_quota),
                    )?;
                }
            }
            Layout::Split(root) => {
                let cpu = root.join("cpu").join(&self.name);
                if limits.cpu_shares > 0 {
                    write_cap(&cpu.join("cpu.shares"), &limits.cpu_shares.to_string())?;
                }
                if limits.cpu_quota >= 0 {
                    write_cap(
                        &cpu.join("cpu.cfs_quota_us"),
                        &limits.cpu_quota.to_string(),
                    )?;
                }
                if limits.cpu_period > 0 {
                    write_cap(
                        &cpu.join("cpu.cfs_period_us"),
                        &limits.cpu_period.to_string(),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn apply_memory_limits(&self, limits: &ResourceLimits) -> Result<()> {
        match &self.layout {
            Layout::Unified(path) => {
                if limits.memory > 0 {
                    write_cap(&path.join("memory.max"), &limits.memory.to_string())?;
                }
                if limits.memory_swap > 0 {
                    // v2 accounts swap alone, not memory+swap.
                    let swap = limits.memory_swap.saturating_sub(limits.memory);
                    if let Err(e) = fs::write(path.join("memory.swap.max"), swap.to_string()) {
                        tracing::warn!(cgroup = %self.name, "failed to set swap limit: {e}");
                    }
                }
            }
            Layout::Split(root) => {
                let mem = root.join("memory").join(&self.name);
                if limits.memory > 0 {
                    write_cap(
                        &mem.join("memory.limit_in_bytes"),
                        &limits.memory.to_string(),
                    )?;
                }
                if limits.memory_swap > 0 {
                    if let Err(e) = fs::write(
                        mem.join("memory.memsw.limit_in_bytes"),
                        limits.memory_swap.to_string(),
                    ) {
                        tracing::warn!(cgroup = %self.name, "failed to set swap limit: {e}");
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_pids_limit(&self, limits: &ResourceLimits) -> Result<()> {
        let path = match &self.layout {
            Layout::Unified(path) => path.join("pids.max"),
            Layout::Split(root) => root.join("pids").join(&self.name).join("pids.max"),
        };
        write_cap(&path, &limits.pids_limit.to_string())
    }

    /// Removes the cgroup directory/ies. Not-found is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if a directory exists but cannot be removed.
    pub fn delete(&self) -> Result<()> {
        let mut last_err = None;
        for path in self.paths() {
            if let Err(e) = remove_cgroup_dir(&path) {
                last_err = Some(Error::kernel(format!(
                    "failed to remove cgroup {}: {e}",
                    path.display()
                )));
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Maps v1 CPU shares onto the v2 weight range [1, 10000].
fn cpu_weight_from_shares(shares: u64) -> u64 {
    let weight = 1 + shares.saturating_sub(2) * 9999 / 262_142;
    weight.max(1)
}

fn write_cap(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)
        .map_err(|e| Error::kernel(format!("failed to write {}: {e}", path.display())))
}

/// Removes a cgroup directory.
///
/// cgroupfs control files cannot be unlinked, so a recursive removal is
/// attempted first (covers nested children) and a plain rmdir second.
fn remove_cgroup_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(_) => match fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
    }
}

fn sanitize(name: &str) -> String {
    name.replace('/', "_").replace("..", "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unified_root() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("cgroup.controllers"), "cpu memory pids").unwrap();
        root
    }

    fn all_controllers() -> Vec<Controller> {
        vec![Controller::Cpu, Controller::Memory, Controller::Pids]
    }

    #[test]
    fn weight_translation_matches_kernel_formula() {
        assert_eq!(cpu_weight_from_shares(2), 1);
        assert_eq!(cpu_weight_from_shares(1024), 39);
        assert_eq!(cpu_weight_from_shares(262_144), 10000);
        // Below the v1 minimum the weight clamps instead of underflowing.
        assert_eq!(cpu_weight_from_shares(1), 1);
    }

    #[test]
    fn v2_layout_uses_single_directory() {
        let root = unified_root();
        let cg = Cgroup::with_root(root.path(), "ab12cd34ef56", all_controllers());
        let paths = cg.paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0], root.path().join("mydocker-ab12cd34ef56"));
    }

    #[test]
    fn v1_layout_uses_per_controller_directories() {
        let root = TempDir::new().unwrap();
        let cg = Cgroup::with_root(root.path(), "ab12cd34ef56", all_controllers());
        let paths = cg.paths();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&root.path().join("cpu/mydocker-ab12cd34ef56")));
        assert!(paths.contains(&root.path().join("memory/mydocker-ab12cd34ef56")));
        assert!(paths.contains(&root.path().join("pids/mydocker-ab12cd34ef56")));
    }

    #[test]
    fn v2_limits_are_written_in_kernel_format() {
        let root = unified_root();
        let cg = Cgroup::with_root(root.path(), "c1", all_controllers());
        cg.create().unwrap();

        let limits = ResourceLimits {
            cpu_shares: 1024,
            cpu_quota: 50_000,
            cpu_period: 100_000,
            memory: 64 * 1024 * 1024,
            memory_swap: 128 * 1024 * 1024,
            pids_limit: 50,
        };
        cg.apply_limits(&limits).unwrap();

        let dir = root.path().join("mydocker-c1");
        assert_eq!(fs::read_to_string(dir.join("cpu.weight")).unwrap(), "39");
        assert_eq!(
            fs::read_to_string(dir.join("cpu.max")).unwrap(),
            "50000 100000"
        );
        assert_eq!(
            fs::read_to_string(dir.join("memory.max")).unwrap(),
            (64 * 1024 * 1024).to_string()
        );
        // v2 swap file carries swap alone, not memory+swap.
        assert_eq!(
            fs::read_to_string(dir.join("memory.swap.max")).unwrap(),
            (64 * 1024 * 1024).to_string()
        );
        assert_eq!(fs::read_to_string(dir.join("pids.max")).unwrap(), "50");
    }

    #[test]
    fn v1_limits_are_written_in_kernel_format() {
        let root = TempDir::new().unwrap();
        let cg = Cgroup::with_root(root.path(), "c1", all_controllers());
        cg.create().unwrap();

        let limits = ResourceLimits {
            memory: 64 * 1024 * 1024,
            memory_swap: 128 * 1024 * 1024,
            pids_limit: 50,
            ..Default::default()
        };
        cg.apply_limits(&limits).unwrap();

        let cpu = root.path().join("cpu/mydocker-c1");
        assert_eq!(fs::read_to_string(cpu.join("cpu.shares")).unwrap(), "1024");
        assert_eq!(
            fs::read_to_string(cpu.join("cpu.cfs_period_us")).unwrap(),
            "100000"
        );
        // Default quota of -1 is not written on v1.
        assert!(!cpu.join("cpu.cfs_quota_us").exists());

        let mem = root.path().join("memory/mydocker-c1");
        assert_eq!(
            fs::read_to_string(mem.join("memory.limit_in_bytes")).unwrap(),
            (64 * 1024 * 1024).to_string()
        );
        assert_eq!(
            fs::read_to_string(mem.join("memory.memsw.limit_in_bytes")).unwrap(),
            (128 * 1024 * 1024).to_string()
        );
        assert_eq!(
            fs::read_to_string(root.path().join("pids/mydocker-c1/pids.max")).unwrap(),
            "50"
        );
    }

    #[test]
    fn default_limits_write_no_cap_files() {
        let root = unified_root();
        let cg = Cgroup::with_root(root.path(), "c2", all_controllers());
        cg.create().unwrap();
        cg.apply_limits(&ResourceLimits::default()).unwrap();

        let dir = root.path().join("mydocker-c2");
        // cpu.weight is always written from the default 1024 shares; the
        // unlimited caps are skipped entirely.
        assert!(dir.join("cpu.weight").exists());
        assert!(!dir.join("cpu.max").exists());
        assert!(!dir.join("memory.max").exists());
        assert!(!dir.join("pids.max").exists());
    }

    #[test]
    fn add_process_writes_pid_everywhere() {
        let root = TempDir::new().unwrap();
        let cg = Cgroup::with_root(root.path(), "c3", all_controllers());
        cg.create().unwrap();
        cg.add_process(4242).unwrap();

        for path in cg.paths() {
            assert_eq!(
                fs::read_to_string(path.join("cgroup.procs")).unwrap(),
                "4242"
            );
        }
    }

    #[test]
    fn delete_removes_directories_and_tolerates_absence() {
        let root = unified_root();
        let cg = Cgroup::with_root(root.path(), "c4", all_controllers());
        cg.create().unwrap();
        assert!(root.path().join("mydocker-c4").exists());

        cg.delete().unwrap();
        assert!(!root.path().join("mydocker-c4").exists());

        // Second delete is a no-op.
        cg.delete().unwrap();
    }

    #[test]
    fn name_is_sanitized() {
        let cg = Cgroup::new("../evil/name", vec![Controller::Cpu]);
        assert_eq!(cg.name(), "mydocker-__evil_name");
    }
}
