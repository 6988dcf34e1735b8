//! mydockerd — the mydocker container daemon.
//!
//! Runs privileged, serves the container API over a unix socket, and
//! supervises all containers. Shutdown ordering is explicit: stop the
//! runners first (graceful, then SIGKILL), then drain the request surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mydocker_api::{ApiServer, ServerConfig};
use mydocker_core::Daemon;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default data directory.
const DEFAULT_DATA_DIR: &str = "/var/lib/mydocker";

#[derive(Debug, Parser)]
#[command(name = "mydockerd")]
#[command(version, about = "mydocker container daemon", long_about = None)]
struct DaemonArgs {
    /// Path to the unix socket.
    #[arg(long, default_value = mydocker_api::server::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Path to the data directory.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mydocker=info,mydockerd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    // Namespace creation, pivot_root, and cgroup writes all require full
    // privileges; fail early instead of half-starting containers.
    if !nix::unistd::geteuid().is_root() {
        bail!("mydockerd must be run as root");
    }

    info!("starting mydockerd");

    std::fs::create_dir_all(&args.data_dir).context("failed to create data directory")?;
    let pid_file = args.data_dir.join("daemon.pid");
    std::fs::write(&pid_file, format!("{}\n", std::process::id()))
        .context("failed to write daemon PID file")?;

    let daemon = Arc::new(Daemon::new(&args.data_dir).context("failed to create daemon")?);

    let server = ApiServer::new(
        ServerConfig {
            socket_path: args.socket.clone(),
        },
        Arc::clone(&daemon),
    );

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            tracing::error!("API server error: {e}");
        }
    });

    info!(
        socket = %args.socket.display(),
        data_dir = %args.data_dir.display(),
        "mydockerd started"
    );

    shutdown_signal().await;
    info!("shutdown signal received, stopping containers");

    // Containers first, listener second: in-flight attach sessions observe
    // their children exit before the surface goes away.
    daemon.shutdown().await;

    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(6), server_handle)
        .await
        .is_err()
    {
        warn!("API server did not drain in time");
    }

    for path in [&args.socket, &pid_file] {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
    }

    info!("mydockerd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
