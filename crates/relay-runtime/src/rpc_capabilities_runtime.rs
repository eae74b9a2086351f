use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::rpc_session_runtime::{rpc_error_contracts, RpcOperation, RpcSessionConfig};

pub const RPC_PROTOCOL_ID: &str = "relay.rpc";
pub const RPC_PROTOCOL_VERSION: &str = "1.0.0";
pub const RPC_MIN_HOST_VERSION: &str = "0.1.0";

/// Protocol-level features that are not tied to a single operation.
const RPC_PROTOCOL_FEATURES: &[&str] = &["worker_pool", "bounded_queue", "queue_stats"];

/// Feature map derived from the operation registry plus protocol extras.
pub fn rpc_feature_flags() -> BTreeMap<&'static str, bool> {
    RpcOperation::ALL
        .iter()
        .map(|operation| operation.feature_flag())
        .chain(RPC_PROTOCOL_FEATURES.iter().copied())
        .map(|feature| (feature, true))
        .collect()
}

/// Returns the canonical spelling of an advertised feature, matched case-insensitively.
pub fn rpc_feature_lookup(name: &str) -> Option<&'static str> {
    let name = name.trim();
    rpc_feature_flags()
        .into_keys()
        .find(|feature| feature.eq_ignore_ascii_case(name))
}

pub fn rpc_operation_names() -> Vec<&'static str> {
    RpcOperation::ALL
        .iter()
        .map(|operation| operation.name())
        .collect()
}

/// Build the `hello` payload for a session running with `config`.
pub fn rpc_capabilities_payload(config: &RpcSessionConfig) -> Value {
    let error_codes = rpc_error_contracts()
        .iter()
        .map(|contract| {
            json!({
                "code": contract.code,
                "category": contract.category,
                "description": contract.description,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "protocol": RPC_PROTOCOL_ID,
        "version": RPC_PROTOCOL_VERSION,
        "minHostVersion": RPC_MIN_HOST_VERSION,
        "features": rpc_feature_flags(),
        "ops": rpc_operation_names(),
        "session": {
            "workers": config.workers,
            "queueSize": config.queue_size,
            "defaultTimeoutMs": config.default_call_timeout_ms,
        },
        "errorCodes": error_codes,
    })
}
