use anyhow::{bail, Result};

use relay_runtime::RpcSessionConfig;

use crate::Cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliRpcMode {
    ServeNdjson,
    Capabilities,
}

/// Selects the command mode, rejecting invocations that name none.
pub fn resolve_cli_rpc_mode(cli: &Cli) -> Result<CliRpcMode> {
    if cli.rpc_serve_ndjson {
        return Ok(CliRpcMode::ServeNdjson);
    }
    if cli.rpc_capabilities {
        return Ok(CliRpcMode::Capabilities);
    }
    bail!("no mode selected; pass --rpc-serve-ndjson or --rpc-capabilities")
}

pub fn rpc_session_config_from_cli(cli: &Cli) -> RpcSessionConfig {
    RpcSessionConfig {
        workers: cli.rpc_workers,
        queue_size: cli.rpc_queue_size,
        default_call_timeout_ms: cli.rpc_call_timeout_ms,
        max_line_bytes: cli.rpc_max_line_bytes,
    }
}
