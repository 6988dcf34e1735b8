//! Stage A of the container bootstrap: spawning `container-init` inside
//! fresh kernel namespaces.
//!
//! The child half of the clone runs before exec with a copied address
//! space, so it is restricted to async-signal-safe calls: everything it
//! needs (argv, environment, file descriptors) is prepared in the parent
//! beforehand.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use mydocker_error::{Error, Result};
use nix::sched::{clone, CloneFlags};
use nix::unistd::Pid;

/// Environment variable carrying the root directory to stage B.
pub const ROOTFS_ENV: &str = "CONTAINER_ROOTFS";

/// Name of the stage-B init binary, expected next to the daemon executable.
pub const INIT_BINARY: &str = "container-init";

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Standard-stream wiring for the child.
#[derive(Debug)]
pub enum ChildIo {
    /// Detached: stdin from `/dev/null`, stdout/stderr inherited from the
    /// daemon.
    Detached {
        /// Open `/dev/null` descriptor, dup2'd onto stdin in the child.
        null: RawFd,
    },
    /// Attached: the PTY slave becomes the controlling terminal and all
    /// three standard streams.
    Pty {
        /// PTY slave descriptor.
        slave: RawFd,
    },
}

/// Spawns `container-init` in new pid, mount, uts, and net namespaces.
///
/// The child creates a new session, wires its standard streams per `io`,
/// and execs `init_path` with the target argv appended. The rootfs travels
/// through [`ROOTFS_ENV`]. Returns the child's pid in the parent's pid
/// namespace; the caller owns reaping it.
///
/// # Errors
///
/// Returns [`Error::Validation`] if an argument contains a NUL byte and
/// [`Error::Spawn`] if the clone itself fails. An exec failure inside the
/// child surfaces as the child exiting with status 127.
pub fn spawn_init(
    init_path: &Path,
    command: &[String],
    rootfs: &Path,
    io: &ChildIo,
) -> Result<Pid> {
    let program = cstring(init_path.as_os_str().as_bytes())?;

    let mut argv = vec![program.clone()];
    for arg in command {
        argv.push(cstring(arg.as_bytes())?);
    }

    let mut envp = Vec::new();
    for (key, value) in std::env::vars_os() {
        if key == ROOTFS_ENV {
            continue;
        }
        let mut entry = key.as_bytes().to_vec();
        entry.push(b'=');
        entry.extend_from_slice(value.as_bytes());
        envp.push(cstring(&entry)?);
    }
    envp.push(cstring(
        format!("{ROOTFS_ENV}={}", rootfs.display()).as_bytes(),
    )?);

    // NULL-terminated pointer arrays for execve, built before the clone.
    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|a| a.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect();
    let envp_ptrs: Vec<*const libc::c_char> = envp
        .iter()
        .map(|e| e.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect();

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let flags = CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWNET;

    let child = Box::new(|| child_after_clone(&program, &argv_ptrs, &envp_ptrs, io));

    // SAFETY: the child callback performs only async-signal-safe work
    // (setsid, ioctl, dup2, close, execve) on data prepared above.
    let pid = unsafe { clone(child, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| Error::spawn(format!("clone failed: {e}")))?;

    Ok(pid)
}

/// Child half of the clone. Returns the exit status used if exec fails.
fn child_after_clone(
    program: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    io: &ChildIo,
) -> isize {
    unsafe {
        libc::setsid();

        match io {
            ChildIo::Detached { null } => {
                libc::dup2(*null, libc::STDIN_FILENO);
            }
            ChildIo::Pty { slave } => {
                let fd = *slave;
                libc::ioctl(fd, libc::TIOCSCTTY as _, 0);
                libc::dup2(fd, libc::STDIN_FILENO);
                libc::dup2(fd, libc::STDOUT_FILENO);
                libc::dup2(fd, libc::STDERR_FILENO);
                if fd > libc::STDERR_FILENO {
                    libc::close(fd);
                }
            }
        }

        libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
    // execve only returns on failure.
    127
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes)
        .map_err(|_| Error::validation("argument contains an interior NUL byte"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_bytes_are_rejected() {
        let err = cstring(b"bad\0arg").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
