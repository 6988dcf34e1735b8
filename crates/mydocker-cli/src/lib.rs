//! mydocker CLI library.
//!
//! Exposes the daemon client and terminal plumbing for the `mydocker`
//! binary and for tests.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod commands;
pub mod terminal;

pub use client::DaemonClient;
