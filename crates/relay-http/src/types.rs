use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One logical proxied call, addressed by path or by OpenAPI `operationId`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub method: Option<String>,
    pub path: Option<String>,
    pub operation_id: Option<String>,
    pub path_params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    /// Upper bound for the whole call, retries and backoff included.
    pub timeout: Duration,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl CallRequest {
    pub fn for_path(method: &str, path: &str, timeout: Duration) -> Self {
        Self {
            method: Some(method.to_string()),
            path: Some(path.to_string()),
            operation_id: None,
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout,
            max_retries: None,
            retry_backoff_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallTiming {
    pub started_unix_ms: u64,
    pub duration_ms: u64,
    pub attempts: u32,
}

/// Response metadata and statistics for a call that reached the upstream.
///
/// Non-2xx statuses are outcomes too; classifying them is the caller's job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallOutcome {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub bytes: u64,
    pub truncated: bool,
    pub timing: CallTiming,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

#[derive(Debug, Error)]
/// Enumerates failures that prevent a call from producing an outcome.
pub enum CallError {
    #[error("invalid call: {0}")]
    InvalidRequest(String),
    #[error("runtime configuration error: {0}")]
    Config(String),
    #[error("unknown operationId '{0}'")]
    UnknownOperation(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for failures caused by the caller's arguments or local configuration.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::Config(_) | Self::UnknownOperation(_)
        )
    }
}

#[async_trait]
/// Trait contract for executing one proxied call.
///
/// Implementations must return [`CallError::Cancelled`] promptly once `cancel`
/// fires.
pub trait CallExecutor: Send + Sync {
    async fn execute(
        &self,
        request: CallRequest,
        cancel: CancellationToken,
    ) -> Result<CallOutcome, CallError>;
}
