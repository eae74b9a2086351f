use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::info;

use relay_cli::{rpc_session_config_from_cli, Cli};
use relay_config::{RuntimeCache, RuntimeCacheOptions, RuntimeProfileOverrides};
use relay_http::HttpCallExecutor;
use relay_runtime::{rpc_capabilities_payload, serve_rpc_session, RpcSessionCollaborators};

pub(crate) fn execute_rpc_capabilities_command(cli: &Cli) -> Result<()> {
    let payload = rpc_capabilities_payload(&rpc_session_config_from_cli(cli));
    let rendered = serde_json::to_string_pretty(&payload)
        .context("failed to serialize rpc capabilities payload")?;
    println!("{rendered}");
    Ok(())
}

fn build_runtime_cache(cli: &Cli) -> Arc<RuntimeCache> {
    let overrides = RuntimeProfileOverrides {
        base_url: cli.base_url.clone(),
        auth_token: None,
    }
    .with_env_fallback();
    Arc::new(RuntimeCache::new(RuntimeCacheOptions {
        profile_path: cli.config.clone(),
        overrides,
    }))
}

pub(crate) async fn execute_rpc_serve_ndjson_command(cli: &Cli) -> Result<()> {
    let config = rpc_session_config_from_cli(cli);
    let runtime_cache = build_runtime_cache(cli);
    let executor = HttpCallExecutor::new(Arc::clone(&runtime_cache))
        .context("failed to build http call executor")?;
    let collaborators = RpcSessionCollaborators {
        executor: Arc::new(executor),
        runtime_cache,
    };

    let reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    let report = serve_rpc_session(reader, &mut writer, config, collaborators)
        .await
        .context("rpc ndjson session failed")?;
    info!(
        processed_lines = report.processed_lines,
        accepted_requests = report.accepted_requests,
        framing_errors = report.framing_errors,
        error_responses = report.error_responses,
        end = ?report.end,
        "rpc ndjson session finished"
    );
    Ok(())
}
