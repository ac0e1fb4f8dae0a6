mod bootstrap_helpers;
mod cli_args;
mod relay_runtime;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::relay_runtime::run_relay;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_relay(cli).await
}
