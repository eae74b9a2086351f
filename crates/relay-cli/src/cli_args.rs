use std::path::PathBuf;

use clap::Parser;

use relay_config::DEFAULT_RUNTIME_PROFILE_PATH;
use relay_runtime::{
    RPC_DEFAULT_CALL_TIMEOUT_MS, RPC_DEFAULT_MAX_LINE_BYTES, RPC_DEFAULT_QUEUE_SIZE,
    RPC_DEFAULT_WORKERS,
};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Drive many REST API calls through one long-lived NDJSON RPC session",
    version
)]
pub struct Cli {
    #[arg(
        long = "rpc-serve-ndjson",
        env = "RELAY_RPC_SERVE_NDJSON",
        default_value_t = false,
        conflicts_with = "rpc_capabilities",
        help = "Run a long-lived RPC NDJSON session over stdin/stdout"
    )]
    pub rpc_serve_ndjson: bool,

    #[arg(
        long = "rpc-capabilities",
        env = "RELAY_RPC_CAPABILITIES",
        default_value_t = false,
        help = "Print the RPC capability (hello) payload as JSON and exit"
    )]
    pub rpc_capabilities: bool,

    #[arg(
        long = "rpc-workers",
        env = "RELAY_RPC_WORKERS",
        value_name = "n",
        default_value_t = RPC_DEFAULT_WORKERS,
        value_parser = parse_positive_usize,
        help = "Number of concurrent RPC workers"
    )]
    pub rpc_workers: usize,

    #[arg(
        long = "rpc-queue-size",
        env = "RELAY_RPC_QUEUE_SIZE",
        value_name = "n",
        default_value_t = RPC_DEFAULT_QUEUE_SIZE,
        value_parser = parse_positive_usize,
        help = "Capacity of the RPC work queue; ingestion blocks when it is full"
    )]
    pub rpc_queue_size: usize,

    #[arg(
        long = "rpc-call-timeout-ms",
        env = "RELAY_RPC_CALL_TIMEOUT_MS",
        value_name = "ms",
        default_value_t = RPC_DEFAULT_CALL_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Default timeout for one call, retries included, when the request sets none"
    )]
    pub rpc_call_timeout_ms: u64,

    #[arg(
        long = "rpc-max-line-bytes",
        env = "RELAY_RPC_MAX_LINE_BYTES",
        value_name = "bytes",
        default_value_t = RPC_DEFAULT_MAX_LINE_BYTES,
        value_parser = parse_positive_usize,
        help = "Longest accepted NDJSON input line; longer lines are rejected as framing errors"
    )]
    pub rpc_max_line_bytes: usize,

    #[arg(
        long = "config",
        env = "RELAY_CONFIG",
        value_name = "path",
        default_value = DEFAULT_RUNTIME_PROFILE_PATH,
        help = "Runtime profile JSON (base URL, headers, auth, retry and body limits)"
    )]
    pub config: PathBuf,

    #[arg(
        long = "base-url",
        env = "RELAY_BASE_URL",
        value_name = "url",
        help = "Override the runtime profile base URL"
    )]
    pub base_url: Option<String>,
}
