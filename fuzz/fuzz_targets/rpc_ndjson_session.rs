#![no_main]

use std::sync::Arc;

use async_trait::async_trait;
use libfuzzer_sys::fuzz_target;
use relay_config::RuntimeCacheInvalidator;
use relay_http::{CallError, CallExecutor, CallOutcome, CallRequest};
use relay_runtime::{serve_rpc_session, RpcSessionCollaborators, RpcSessionConfig};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

struct RejectingExecutor;

#[async_trait]
impl CallExecutor for RejectingExecutor {
    async fn execute(
        &self,
        _request: CallRequest,
        _cancel: CancellationToken,
    ) -> Result<CallOutcome, CallError> {
        Err(CallError::Config("fuzz executor performs no calls".to_string()))
    }
}

struct NoopInvalidator;

impl RuntimeCacheInvalidator for NoopInvalidator {
    fn invalidate_runtime_caches(&self) {}
}

fuzz_target!(|data: &[u8]| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    else {
        return;
    };
    let collaborators = RpcSessionCollaborators {
        executor: Arc::new(RejectingExecutor),
        runtime_cache: Arc::new(NoopInvalidator),
    };
    let config = RpcSessionConfig {
        workers: 2,
        queue_size: 2,
        default_call_timeout_ms: 50,
        max_line_bytes: 4096,
    };
    let mut output = Vec::new();
    let report = runtime
        .block_on(serve_rpc_session(
            BufReader::new(data),
            &mut output,
            config,
            collaborators,
        ))
        .expect("in-memory session never fails");

    let lines = output.iter().filter(|byte| **byte == b'\n').count();
    assert_eq!(lines, report.responses_written);
    assert_eq!(
        report.responses_written,
        report.accepted_requests + report.framing_errors
    );
});
