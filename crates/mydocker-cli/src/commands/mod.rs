//! CLI argument definitions and command dispatch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod ps;
pub mod run;
pub mod stop;

/// mydocker — minimal container runtime client.
#[derive(Parser)]
#[command(name = "mydocker", version, about = "Minimal container runtime client")]
pub struct Cli {
    /// Path to the daemon socket.
    #[arg(long, global = true, default_value = crate::client::DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create and run a new container
    Run(run::RunArgs),
    /// List containers
    Ps,
    /// Stop a running container
    Stop(stop::StopArgs),
}
