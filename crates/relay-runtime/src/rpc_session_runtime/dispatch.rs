use std::{collections::BTreeMap, time::Duration};

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relay_http::{CallError, CallOutcome, CallRequest};

use super::{
    rpc_cancellation_key, RpcCancellationRegistry, RpcRequest, RpcResponse,
    RpcSessionCollaborators, RpcSessionConfig, RPC_CODE_AUTH, RPC_CODE_CANCELLED,
    RPC_CODE_NETWORK, RPC_CODE_USAGE, RPC_CODE_UPSTREAM,
};
use crate::rpc_capabilities_runtime::{rpc_capabilities_payload, rpc_feature_flags, rpc_feature_lookup};

/// Closed set of operations a session routes; also the source of the
/// advertised operation list and feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcOperation {
    Hello,
    Capability,
    Call,
    Cancel,
    ReloadConfig,
    Shutdown,
}

impl RpcOperation {
    pub const ALL: [RpcOperation; 6] = [
        RpcOperation::Hello,
        RpcOperation::Capability,
        RpcOperation::Call,
        RpcOperation::Cancel,
        RpcOperation::ReloadConfig,
        RpcOperation::Shutdown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Capability => "capability",
            Self::Call => "call",
            Self::Cancel => "cancel",
            Self::ReloadConfig => "reload_config",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn feature_flag(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Capability => "capability_negotiation",
            Self::Call => "call",
            Self::Cancel => "call_cancellation",
            Self::ReloadConfig => "reload_config",
            Self::Shutdown => "graceful_shutdown",
        }
    }

    /// Case-insensitive lookup by operation name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|operation| operation.name().eq_ignore_ascii_case(name))
    }
}

/// Scheduling statistics captured when a worker dequeues an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcQueueStats {
    pub queue_wait_ms: u64,
    pub queue_depth: usize,
}

/// Shared, read-mostly state handed to every worker.
pub struct RpcDispatchContext {
    pub config: RpcSessionConfig,
    pub collaborators: RpcSessionCollaborators,
    pub cancellations: RpcCancellationRegistry,
}

impl RpcDispatchContext {
    pub fn new(config: RpcSessionConfig, collaborators: RpcSessionCollaborators) -> Self {
        Self {
            config,
            collaborators,
            cancellations: RpcCancellationRegistry::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RpcCapabilityArgs {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcCancelArgs {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcCallArgs {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    operation_id: Option<String>,
    #[serde(default)]
    path_params: BTreeMap<String, Value>,
    #[serde(default)]
    query: BTreeMap<String, Value>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(default)]
    retry_backoff_ms: Option<u64>,
}

/// Route one request to its operation handler. Never fails: every problem is
/// reported through the returned response.
pub async fn dispatch_rpc_request(
    context: &RpcDispatchContext,
    request: RpcRequest,
    stats: RpcQueueStats,
) -> RpcResponse {
    let Some(operation) = RpcOperation::from_name(&request.op) else {
        debug!(op = %request.op, "rejecting unknown rpc op");
        return RpcResponse::failure(
            request.id,
            RPC_CODE_USAGE,
            format!("unknown op '{}'", request.op),
        );
    };
    debug!(
        op = operation.name(),
        request_id = ?request.id,
        queue_wait_ms = stats.queue_wait_ms,
        queue_depth = stats.queue_depth,
        "dispatching rpc request"
    );

    match operation {
        RpcOperation::Hello => {
            RpcResponse::success(request.id, rpc_capabilities_payload(&context.config))
        }
        RpcOperation::Capability => handle_capability(request),
        RpcOperation::Call => {
            let response = handle_call(context, request).await;
            annotate_queue_stats(response, stats)
        }
        RpcOperation::Cancel => handle_cancel(context, request),
        RpcOperation::ReloadConfig => {
            context
                .collaborators
                .runtime_cache
                .invalidate_runtime_caches();
            RpcResponse::success(request.id, json!({"reloaded": true}))
        }
        RpcOperation::Shutdown => RpcResponse::success(request.id, json!({"shutdown": true})),
    }
}

fn parse_args<T>(operation: RpcOperation, args: Option<Value>) -> Result<T, String>
where
    T: DeserializeOwned + Default,
{
    match args {
        None | Some(Value::Null) => Ok(T::default()),
        Some(args) => serde_json::from_value(args)
            .map_err(|error| format!("invalid args for '{}': {error}", operation.name())),
    }
}

fn handle_capability(request: RpcRequest) -> RpcResponse {
    let args = match parse_args::<RpcCapabilityArgs>(RpcOperation::Capability, request.args) {
        Ok(args) => args,
        Err(error) => return RpcResponse::failure(request.id, RPC_CODE_USAGE, error),
    };
    match args.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        None => RpcResponse::success(request.id, json!({"features": rpc_feature_flags()})),
        Some(name) => {
            let data = match rpc_feature_lookup(name) {
                Some(canonical) => json!({"name": canonical, "supported": true}),
                None => json!({"name": name, "supported": false}),
            };
            RpcResponse::success(request.id, data)
        }
    }
}

fn handle_cancel(context: &RpcDispatchContext, request: RpcRequest) -> RpcResponse {
    let args = match parse_args::<RpcCancelArgs>(RpcOperation::Cancel, request.args) {
        Ok(args) => args,
        Err(error) => return RpcResponse::failure(request.id, RPC_CODE_USAGE, error),
    };
    let Some(target) = args.id else {
        return RpcResponse::failure(request.id, RPC_CODE_USAGE, "cancel requires a target 'id'");
    };
    let Some(key) = rpc_cancellation_key(&target) else {
        return RpcResponse::failure(
            request.id,
            RPC_CODE_USAGE,
            "cancel target 'id' must be a non-empty JSON scalar",
        );
    };
    let cancelled = context.cancellations.cancel(&key);
    debug!(target = %key, cancelled, "processed rpc cancel");
    RpcResponse::success(request.id, json!({"id": target, "cancelled": cancelled}))
}

async fn handle_call(context: &RpcDispatchContext, request: RpcRequest) -> RpcResponse {
    let args = match parse_args::<RpcCallArgs>(RpcOperation::Call, request.args) {
        Ok(args) => args,
        Err(error) => return RpcResponse::failure(request.id, RPC_CODE_USAGE, error),
    };
    let call = match build_call_request(args, context.config.default_call_timeout_ms) {
        Ok(call) => call,
        Err(error) => return RpcResponse::failure(request.id, RPC_CODE_USAGE, error),
    };

    let cancel = CancellationToken::new();
    let registration = context
        .cancellations
        .register(request.id.as_ref(), cancel.clone());
    let result = context
        .collaborators
        .executor
        .execute(call, cancel.clone())
        .await;
    if let Some(registration) = registration {
        registration.release();
    }
    // A replaced registration is not a cancellation; only this call's own token counts.
    let cancelled_by_request = cancel.is_cancelled();

    match result {
        Err(CallError::Cancelled) => cancelled_call_response(request.id),
        _ if cancelled_by_request => cancelled_call_response(request.id),
        Ok(outcome) => call_outcome_response(request.id, outcome),
        Err(error) => call_error_response(request.id, error),
    }
}

fn build_call_request(args: RpcCallArgs, default_timeout_ms: u64) -> Result<CallRequest, String> {
    let has_path = args.path.as_deref().is_some_and(|path| !path.trim().is_empty());
    let has_operation = args
        .operation_id
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());
    if has_path == has_operation {
        return Err("call requires exactly one of 'path' or 'operationId'".to_string());
    }
    let timeout_ms = match args.timeout_ms {
        Some(timeout_ms) if timeout_ms > 0 => timeout_ms,
        _ => default_timeout_ms,
    };
    Ok(CallRequest {
        method: args.method,
        path: args.path,
        operation_id: args.operation_id,
        path_params: scalar_map(args.path_params, "pathParams")?,
        query: scalar_map(args.query, "query")?,
        headers: args.headers,
        body: args.body,
        timeout: Duration::from_millis(timeout_ms),
        max_retries: args.retries,
        retry_backoff_ms: args.retry_backoff_ms,
    })
}

fn scalar_map(
    values: BTreeMap<String, Value>,
    field: &str,
) -> Result<BTreeMap<String, String>, String> {
    values
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => Ok((key, text)),
            Value::Number(number) => Ok((key, number.to_string())),
            Value::Bool(flag) => Ok((key, flag.to_string())),
            _ => Err(format!("'{field}.{key}' must be a string, number, or boolean")),
        })
        .collect()
}

fn cancelled_call_response(id: Option<Value>) -> RpcResponse {
    RpcResponse::failure(id, RPC_CODE_CANCELLED, CallError::Cancelled.to_string())
        .with_data(json!({"cancelled": true}))
}

fn call_outcome_response(id: Option<Value>, outcome: CallOutcome) -> RpcResponse {
    let status = outcome.status;
    let data = json!({
        "status": status,
        "headers": outcome.headers,
        "body": outcome.body,
        "bytes": outcome.bytes,
        "truncated": outcome.truncated,
        "timing": outcome.timing,
        "attempts": outcome.timing.attempts,
    });
    let response = if outcome.is_success() {
        RpcResponse::success(id, data)
    } else {
        let code = if outcome.is_auth_failure() {
            RPC_CODE_AUTH
        } else {
            RPC_CODE_UPSTREAM
        };
        RpcResponse::failure(id, code, format!("upstream responded with status {status}"))
            .with_data(data)
    };
    response.with_status(status)
}

fn call_error_response(id: Option<Value>, error: CallError) -> RpcResponse {
    let code = if error.is_usage() {
        RPC_CODE_USAGE
    } else {
        RPC_CODE_NETWORK
    };
    let data = if error.is_timeout() {
        json!({"timedOut": true})
    } else {
        json!({})
    };
    warn!(request_id = ?id, code, error = %error, "rpc call failed");
    RpcResponse::failure(id, code, error.to_string()).with_data(data)
}

fn annotate_queue_stats(mut response: RpcResponse, stats: RpcQueueStats) -> RpcResponse {
    let mut data = match response.data.take() {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
        None => Map::new(),
    };
    data.insert("queueWaitMs".to_string(), json!(stats.queue_wait_ms));
    data.insert("queueDepth".to_string(), json!(stats.queue_depth));
    response.data = Some(Value::Object(data));
    response
}
