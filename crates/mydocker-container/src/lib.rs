//! # mydocker-container
//!
//! Container lifecycle engine for mydocker.
//!
//! A container is a child process launched inside fresh kernel namespaces
//! (pid, mount, uts, net), pivoted into a caller-supplied root directory,
//! with optional cgroup resource caps. The bootstrap is two-stage:
//!
//! ```text
//! mydockerd ──clone(CLONE_NEW*)──► container-init ──execvp──► target program
//!   (stage A: spawn)                (stage B: mounts, pivot_root)
//! ```
//!
//! Stage A ([`spawn`]) runs in the daemon and only performs
//! async-signal-safe work between clone and exec. Stage B ([`init`]) runs as
//! the `container-init` binary inside the new namespaces, where the mount
//! operations are legal, and finally replaces itself with the target
//! program so the daemon's wait observes the real exit status.
//!
//! The [`Runner`] owns one container's child process, cgroup, and optional
//! PTY for the container's lifetime.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod init;
pub mod pty;
pub mod runner;
pub mod spawn;
pub mod state;

pub use pty::Pty;
pub use runner::Runner;
pub use state::{ContainerId, ContainerRecord, ContainerStatus};
