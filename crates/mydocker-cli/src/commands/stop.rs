//! `mydocker stop` — stop a running container.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use crate::client::DaemonClient;

/// Arguments for the stop command.
#[derive(Args)]
pub struct StopArgs {
    /// Container ID
    pub id: String,
}

/// Executes the stop command.
pub async fn execute(socket: &Path, args: StopArgs) -> Result<()> {
    let client = DaemonClient::with_socket(socket);
    client.stop_container(&args.id).await?;
    println!("Container {} stopped", args.id);
    Ok(())
}
