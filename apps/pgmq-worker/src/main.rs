//! pgmq Worker - Entry Point

use clap::Parser;
use pgmq_worker::cli::Cli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    core_config::tracing::install_color_eyre();
    pgmq_worker::run(Cli::parse()).await
}
