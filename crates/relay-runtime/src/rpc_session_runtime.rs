use std::{sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    sync::mpsc,
};
use tracing::{error, info};

use relay_config::RuntimeCacheInvalidator;
use relay_http::CallExecutor;

mod cancellation;
mod dispatch;
mod parsing;
mod transport;
mod worker_pool;

pub use cancellation::{rpc_cancellation_key, RpcCancelRegistration, RpcCancellationRegistry};
pub use dispatch::{dispatch_rpc_request, RpcDispatchContext, RpcOperation, RpcQueueStats};
pub use parsing::decode_rpc_request;

use transport::{ingest_rpc_requests, write_rpc_responses};
use worker_pool::RpcWorkerPool;

pub const RPC_CODE_OK: i32 = 0;
pub const RPC_CODE_INTERNAL: i32 = 1;
pub const RPC_CODE_USAGE: i32 = 2;
pub const RPC_CODE_AUTH: i32 = 3;
pub const RPC_CODE_NETWORK: i32 = 4;
pub const RPC_CODE_UPSTREAM: i32 = 5;
pub const RPC_CODE_CANCELLED: i32 = 6;

pub const RPC_DEFAULT_WORKERS: usize = 4;
pub const RPC_DEFAULT_QUEUE_SIZE: usize = 64;
pub const RPC_DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub const RPC_DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcErrorContract {
    pub code: i32,
    pub category: &'static str,
    pub description: &'static str,
}

const RPC_ERROR_CONTRACTS: &[RpcErrorContract] = &[
    RpcErrorContract {
        code: RPC_CODE_OK,
        category: "ok",
        description: "request completed successfully",
    },
    RpcErrorContract {
        code: RPC_CODE_INTERNAL,
        category: "internal",
        description: "unexpected engine failure while handling the request",
    },
    RpcErrorContract {
        code: RPC_CODE_USAGE,
        category: "usage",
        description: "malformed line, unknown op, invalid args, or unresolvable call target",
    },
    RpcErrorContract {
        code: RPC_CODE_AUTH,
        category: "auth",
        description: "upstream rejected the call credentials (401/403)",
    },
    RpcErrorContract {
        code: RPC_CODE_NETWORK,
        category: "network",
        description: "transport failure or call timeout before an upstream response",
    },
    RpcErrorContract {
        code: RPC_CODE_UPSTREAM,
        category: "upstream",
        description: "upstream answered with a non-success status",
    },
    RpcErrorContract {
        code: RPC_CODE_CANCELLED,
        category: "cancelled",
        description: "call terminated by a cancel request",
    },
];

pub fn rpc_error_contracts() -> &'static [RpcErrorContract] {
    RPC_ERROR_CONTRACTS
}

/// Decoded request envelope read from one NDJSON input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub op: String,
    #[serde(default)]
    pub args: Option<Value>,
}

impl RpcRequest {
    pub fn is_shutdown(&self) -> bool {
        RpcOperation::from_name(&self.op) == Some(RpcOperation::Shutdown)
    }
}

/// Response envelope written as one NDJSON output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, data: Value) -> Self {
        Self {
            id,
            ok: true,
            code: RPC_CODE_OK,
            status: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            code,
            status: None,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Framing-level error for an input line that never became a request.
    pub fn framing_error(reason: impl std::fmt::Display) -> Self {
        Self::failure(
            None,
            RPC_CODE_USAGE,
            format!("invalid request line: {reason}"),
        )
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Work item moved through the bounded queue.
#[derive(Debug, Clone)]
pub struct RpcWorkItem {
    pub request: RpcRequest,
    pub enqueued_at: Instant,
}

impl RpcWorkItem {
    pub fn new(request: RpcRequest) -> Self {
        Self {
            request,
            enqueued_at: Instant::now(),
        }
    }
}

/// Session start parameters, validated before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcSessionConfig {
    pub workers: usize,
    pub queue_size: usize,
    pub default_call_timeout_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for RpcSessionConfig {
    fn default() -> Self {
        Self {
            workers: RPC_DEFAULT_WORKERS,
            queue_size: RPC_DEFAULT_QUEUE_SIZE,
            default_call_timeout_ms: RPC_DEFAULT_CALL_TIMEOUT_MS,
            max_line_bytes: RPC_DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl RpcSessionConfig {
    pub fn validate(&self) -> Result<(), RpcSessionError> {
        if self.workers == 0 {
            return Err(RpcSessionError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(RpcSessionError::InvalidConfig(
                "queue size must be at least 1".to_string(),
            ));
        }
        if self.default_call_timeout_ms == 0 {
            return Err(RpcSessionError::InvalidConfig(
                "default call timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(RpcSessionError::InvalidConfig(
                "max line bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// External collaborators a session dispatches through.
#[derive(Clone)]
pub struct RpcSessionCollaborators {
    pub executor: Arc<dyn CallExecutor>,
    pub runtime_cache: Arc<dyn RuntimeCacheInvalidator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcSessionEnd {
    Eof,
    Shutdown,
    ReadError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcSessionState {
    Running,
    Draining,
    Closed,
}

impl RpcSessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RpcSessionReport {
    pub processed_lines: usize,
    pub accepted_requests: usize,
    pub framing_errors: usize,
    pub responses_written: usize,
    pub error_responses: usize,
    pub end: RpcSessionEnd,
}

#[derive(Debug, Error)]
/// Fatal session failures; everything else is reported as a response line.
pub enum RpcSessionError {
    #[error("invalid rpc session config: {0}")]
    InvalidConfig(String),
    #[error("failed to read rpc ndjson input line: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to serialize rpc response line: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write rpc response line: {0}")]
    Write(#[source] std::io::Error),
}

/// Run one NDJSON RPC session until EOF, `shutdown`, or a fatal error.
///
/// Workers and the writer start before the first line is read. Queued and
/// in-flight work is drained before returning, whatever ended the input.
/// Responses are emitted in completion order.
pub async fn serve_rpc_session<R, W>(
    reader: R,
    writer: &mut W,
    config: RpcSessionConfig,
    collaborators: RpcSessionCollaborators,
) -> Result<RpcSessionReport, RpcSessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    info!(
        workers = config.workers,
        queue_size = config.queue_size,
        default_call_timeout_ms = config.default_call_timeout_ms,
        state = RpcSessionState::Running.as_str(),
        "rpc session started"
    );

    let context = Arc::new(RpcDispatchContext::new(config, collaborators));
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_size);
    let (results_tx, results_rx) =
        mpsc::channel(config.queue_size.saturating_add(config.workers));
    let pool = RpcWorkerPool::spawn(context, queue_rx, results_tx.clone());

    let ingest_and_drain = async move {
        let summary = ingest_rpc_requests(reader, config.max_line_bytes, queue_tx, results_tx).await;
        info!(
            end = ?summary.end,
            processed_lines = summary.processed_lines,
            state = RpcSessionState::Draining.as_str(),
            "rpc session input finished"
        );
        pool.join().await;
        summary
    };
    let (ingest, written) = tokio::join!(ingest_and_drain, write_rpc_responses(results_rx, writer));

    info!(
        responses_written = written.responses_written,
        state = RpcSessionState::Closed.as_str(),
        "rpc session closed"
    );
    if let Some(write_error) = written.error {
        error!(error = %write_error, "rpc session output failed");
        return Err(write_error);
    }
    if let Some(read_error) = ingest.read_error {
        error!(error = %read_error, "rpc session input failed");
        return Err(RpcSessionError::Read(read_error));
    }
    Ok(RpcSessionReport {
        processed_lines: ingest.processed_lines,
        accepted_requests: ingest.accepted_requests,
        framing_errors: ingest.framing_errors,
        responses_written: written.responses_written,
        error_responses: written.error_responses,
        end: ingest.end,
    })
}
