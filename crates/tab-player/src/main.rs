//! Tab player simulation: opens several tabs on one in-process bus and runs a
//! scripted list of user actions against them.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tab_player::{cli, runtime};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tab_player=info")),
        )
        .init();

    runtime::run(args).await
}
