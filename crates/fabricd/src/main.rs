//! fabricd - Fabric node agent daemon.
//!
//! Joins (or bootstraps) a gossip cluster, watches the local container
//! runtime and runs until it receives a termination signal.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    // Initialize tracing
    let directive = if cli.debug { "fabric=debug" } else { "fabric=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    cli.execute().await
}
