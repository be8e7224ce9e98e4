//! Batch reconciliation job and operational tooling.

use clap::Parser;

use swap_reconciler::cli::{Cli, run_command};
use swap_reconciler::config::setup_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { env, command } = Cli::parse();
    let config = env.into_config();
    setup_tracing(&config.log_level);

    run_command(config, command).await
}
