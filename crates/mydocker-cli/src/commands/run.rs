//! `mydocker run` — create and start a container.

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;
use mydocker_api::types::ContainerCreateRequest;

use crate::client::DaemonClient;

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the rootfs directory (required, absolute)
    #[arg(long, value_name = "PATH")]
    pub rootfs: String,

    /// Memory limit in bytes (e.g. 536870912 for 512MB)
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub memory: u64,

    /// Memory + swap limit in bytes
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub memory_swap: u64,

    /// CPU shares (relative weight)
    #[arg(long, value_name = "N", default_value_t = 1024)]
    pub cpu_shares: u64,

    /// CPU quota in microseconds (-1 for unlimited)
    #[arg(
        long,
        value_name = "MICROS",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub cpu_quota: i64,

    /// CPU period in microseconds
    #[arg(long, value_name = "MICROS", default_value_t = 100_000)]
    pub cpu_period: u64,

    /// Maximum number of PIDs/processes
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub pids_limit: i64,

    /// Run container in detached mode (background)
    #[arg(short = 'd', long)]
    pub detach: bool,

    /// Command and arguments to run inside the container
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the run command.
pub async fn execute(socket: &Path, args: RunArgs) -> Result<()> {
    if !Path::new(&args.rootfs).is_absolute() {
        bail!("--rootfs must be an absolute path");
    }

    let request = ContainerCreateRequest {
        // The image field is an alias for the rootfs today.
        image: args.rootfs.clone(),
        command: args.command,
        rootfs: args.rootfs,
        memory: args.memory,
        memory_swap: args.memory_swap,
        cpu_shares: args.cpu_shares,
        cpu_quota: args.cpu_quota,
        cpu_period: args.cpu_period,
        pids_limit: args.pids_limit,
        detach: args.detach,
    };

    let client = DaemonClient::with_socket(socket);
    let id = client.create_container(request).await?;
    println!("{id}");
    Ok(())
}
