//! Stage B of the container bootstrap: the in-namespace init sequence.
//!
//! Runs inside the freshly-cloned namespaces as the `container-init`
//! binary, where mount operations are legal and invisible to the host.
//! The sequence ends with an exec that replaces the init image with the
//! target program, preserving the pid the daemon is waiting on.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs;
use std::io;
use std::path::Path;

use mydocker_error::{Error, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, chroot, execvp, pivot_root};

/// Runs the init sequence and execs the target program.
///
/// In order: re-propagate the mount tree as private, mount `/proc` under
/// the new root, pivot into the root (falling back to `chroot` when the
/// kernel or filesystem refuses `pivot_root`), default `TERM`, exec.
///
/// # Errors
///
/// Only returns on failure; on success the process image is replaced.
pub fn run(rootfs: &Path, command: &[String]) -> Result<Infallible> {
    if command.is_empty() {
        return Err(Error::validation("no command specified"));
    }

    // Keep our mounts out of the host: everything below is private to this
    // mount namespace.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| Error::kernel(format!("failed to make / private: {e}")))?;

    mount_proc(rootfs)?;

    if let Err(e) = enter_root(rootfs) {
        eprintln!("container-init: pivot_root failed, falling back to chroot: {e}");
        chroot(rootfs).map_err(|e| Error::kernel(format!("chroot failed: {e}")))?;
        chdir("/").map_err(|e| Error::kernel(format!("chdir failed: {e}")))?;
    }

    if std::env::var_os("TERM").is_none() {
        std::env::set_var("TERM", "xterm");
    }

    let program = CString::new(command[0].as_str())
        .map_err(|_| Error::validation("command contains an interior NUL byte"))?;
    let argv: Vec<CString> = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::validation("argument contains an interior NUL byte"))?;

    execvp(&program, &argv)
        .map_err(|e| Error::spawn(format!("exec {} failed: {e}", command[0])))?;
    unreachable!("execvp returned without error")
}

/// Mounts the proc filesystem under the new root.
fn mount_proc(rootfs: &Path) -> Result<()> {
    let proc_path = rootfs.join("proc");
    fs::create_dir_all(&proc_path)
        .map_err(|e| Error::kernel(format!("failed to create proc dir: {e}")))?;

    mount(
        Some("proc"),
        &proc_path,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| Error::kernel(format!("failed to mount proc: {e}")))?;
    Ok(())
}

/// Swaps the root filesystem via `pivot_root(2)`.
///
/// Stronger than chroot: the old root is detached entirely, so no dangling
/// descriptor can reach back out. `pivot_root` requires the new root to be
/// a mount point, hence the bind mount onto itself.
fn enter_root(new_root: &Path) -> Result<()> {
    if !new_root.is_absolute() {
        return Err(Error::validation("rootfs must be an absolute path"));
    }

    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| Error::kernel(format!("bind mount of rootfs failed: {e}")))?;

    let put_old = new_root.join(".pivot_root");
    if let Err(e) = fs::create_dir(&put_old) {
        if e.kind() != io::ErrorKind::AlreadyExists {
            return Err(Error::kernel(format!("failed to create pivot dir: {e}")));
        }
    }

    pivot_root(new_root, &put_old)
        .map_err(|e| Error::kernel(format!("pivot_root failed: {e}")))?;

    chdir("/").map_err(|e| Error::kernel(format!("chdir failed: {e}")))?;

    // The old root is still mounted at /.pivot_root; detach it lazily and
    // drop the mount point.
    umount2("/.pivot_root", MntFlags::MNT_DETACH)
        .map_err(|e| Error::kernel(format!("unmount of old root failed: {e}")))?;
    fs::remove_dir("/.pivot_root")
        .map_err(|e| Error::kernel(format!("failed to remove pivot dir: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_is_rejected() {
        let err = run(Path::new("/tmp"), &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn relative_rootfs_is_rejected_by_pivot() {
        let err = enter_root(Path::new("relative/path")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
