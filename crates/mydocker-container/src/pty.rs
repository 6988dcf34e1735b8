//! Pseudo-terminal allocation for attached containers.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use mydocker_error::{Error, Result};
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{openpty, OpenptyResult};

/// PTY master/slave pair.
///
/// The master stays in the daemon and is bridged to the client socket; the
/// slave becomes the child's controlling terminal and all three standard
/// streams. Both ends are close-on-exec: the slave survives into the child
/// only through the dup2 calls in the spawn path, and the master must never
/// leak into the container (a container holding its own master would keep
/// the session alive after the client disconnects).
pub struct Pty {
    master: OwnedFd,
    slave: Option<OwnedFd>,
}

impl Pty {
    /// Opens a new PTY pair.
    ///
    /// The master is switched to non-blocking mode so it can be driven from
    /// the async reactor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Kernel`] if allocation or fd configuration fails.
    pub fn open() -> Result<Self> {
        let OpenptyResult { master, slave } =
            openpty(None, None).map_err(|e| Error::kernel(format!("failed to open pty: {e}")))?;

        set_nonblocking(master.as_raw_fd())?;
        set_cloexec(master.as_raw_fd())?;
        set_cloexec(slave.as_raw_fd())?;

        Ok(Self {
            master,
            slave: Some(slave),
        })
    }

    /// Returns the slave file descriptor for the spawn path.
    ///
    /// # Panics
    ///
    /// Panics if the slave has already been released.
    #[must_use]
    pub fn slave_fd(&self) -> RawFd {
        self.slave
            .as_ref()
            .expect("pty slave already released")
            .as_raw_fd()
    }

    /// Returns the master file descriptor.
    #[must_use]
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Consumes the pair, dropping the slave and keeping the master.
    ///
    /// Called in the parent once the child owns its copy of the slave, so
    /// EOF and hangup propagate correctly through the master.
    #[must_use]
    pub fn into_master(mut self) -> OwnedFd {
        self.slave.take();
        self.master
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| Error::kernel(format!("failed to get pty flags: {e}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))
        .map_err(|e| Error::kernel(format!("failed to set pty flags: {e}")))?;
    Ok(())
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| Error::kernel(format!("failed to set close-on-exec: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_yields_valid_pair() {
        let pty = Pty::open().unwrap();
        assert!(pty.master_fd() >= 0);
        assert!(pty.slave_fd() >= 0);
    }

    #[test]
    fn into_master_releases_slave() {
        let pty = Pty::open().unwrap();
        let master = pty.into_master();
        assert!(master.as_raw_fd() >= 0);
    }

    #[test]
    fn master_is_nonblocking() {
        let pty = Pty::open().unwrap();
        let flags = fcntl(pty.master_fd(), FcntlArg::F_GETFL).unwrap();
        assert!(OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK));
    }
}
