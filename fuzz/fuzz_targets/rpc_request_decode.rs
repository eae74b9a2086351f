#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_runtime::{decode_rpc_request, RpcOperation};
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = decode_rpc_request(data) {
        assert!(!matches!(
            request.id,
            Some(Value::Array(_)) | Some(Value::Object(_))
        ));
        if let Some(operation) = RpcOperation::from_name(&request.op) {
            assert!(operation.name().eq_ignore_ascii_case(request.op.trim()));
        }
    }
});
