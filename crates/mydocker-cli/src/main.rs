//! mydocker — minimal container runtime client.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mydocker_cli::commands::{self, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mydocker=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(&cli.socket, args).await,
        Commands::Ps => commands::ps::execute(&cli.socket).await,
        Commands::Stop(args) => commands::stop::execute(&cli.socket, args).await,
    }
}
