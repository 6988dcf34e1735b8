//! # mydocker-cgroups
//!
//! Control-group management for mydocker containers.
//!
//! A [`Cgroup`] is a handle on one per-container control group. The kernel
//! exposes two incompatible cgroup generations: the unified v2 hierarchy
//! (one directory, `cgroup.controllers` at the root) and the split v1 layout
//! (one directory per controller). The handle detects the flavor once at
//! construction and translates the abstract [`ResourceLimits`] to whichever
//! file layout the host presents; callers never branch on the version.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cgroup;
pub mod limits;

pub use cgroup::{Cgroup, Controller};
pub use limits::ResourceLimits;
