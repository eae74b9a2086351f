mod bootstrap_helpers;
mod rpc_protocol;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_cli::{resolve_cli_rpc_mode, Cli, CliRpcMode};

use crate::bootstrap_helpers::init_tracing;
use crate::rpc_protocol::{execute_rpc_capabilities_command, execute_rpc_serve_ndjson_command};

/// Bound on waiting for the blocking stdin reader after a `shutdown` op.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(run_cli(cli));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run_cli(cli: Cli) -> Result<()> {
    match resolve_cli_rpc_mode(&cli)? {
        CliRpcMode::Capabilities => execute_rpc_capabilities_command(&cli),
        CliRpcMode::ServeNdjson => execute_rpc_serve_ndjson_command(&cli).await,
    }
}
