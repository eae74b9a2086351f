use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION},
    Method, Response,
};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_config::{OpenApiIndex, RuntimeCache, RuntimeProfile};
use relay_core::{current_unix_timestamp_ms, elapsed_ms};

use crate::retry::{
    is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status,
};
use crate::{CallError, CallExecutor, CallOutcome, CallRequest, CallTiming};

const RETRY_ATTEMPT_HEADER: &str = "x-relay-retry-attempt";
const DEFAULT_CALL_METHOD: &str = "GET";

/// reqwest-backed [`CallExecutor`] reading its settings from a [`RuntimeCache`].
#[derive(Debug, Clone)]
pub struct HttpCallExecutor {
    client: reqwest::Client,
    cache: Arc<RuntimeCache>,
}

#[derive(Debug)]
struct ResolvedCall {
    method: Method,
    url: String,
    headers: HeaderMap,
    query: BTreeMap<String, String>,
    body: Option<Value>,
    max_retries: u32,
    retry_backoff_ms: u64,
    max_body_bytes: usize,
}

impl HttpCallExecutor {
    pub fn new(cache: Arc<RuntimeCache>) -> Result<Self, CallError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, cache })
    }

    pub fn runtime_cache(&self) -> &Arc<RuntimeCache> {
        &self.cache
    }

    async fn resolve(&self, request: CallRequest) -> Result<ResolvedCall, CallError> {
        let needs_openapi = request
            .operation_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        let (profile, index) = self.load_runtime_config(needs_openapi).await?;
        let (method, path_template) = resolve_target(&request, index.as_deref())?;
        let path = fill_path_params(&path_template, &request.path_params)?;
        let url = build_call_url(&profile, &path)?;
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| CallError::InvalidRequest(format!("invalid http method '{method}'")))?;
        let headers = build_call_headers(&profile, &request.headers)?;

        Ok(ResolvedCall {
            method,
            url,
            headers,
            query: request.query,
            body: request.body,
            max_retries: request.max_retries.unwrap_or(profile.max_retries),
            retry_backoff_ms: request.retry_backoff_ms.unwrap_or(profile.retry_backoff_ms),
            max_body_bytes: profile.max_body_bytes,
        })
    }

    /// Reads the profile, and the OpenAPI index when asked, on the blocking
    /// pool. A cold cache (startup or after `invalidate`) hits the filesystem.
    async fn load_runtime_config(
        &self,
        with_openapi: bool,
    ) -> Result<(Arc<RuntimeProfile>, Option<Arc<OpenApiIndex>>), CallError> {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || -> Result<_, CallError> {
            let profile = cache
                .profile()
                .map_err(|error| CallError::Config(format!("{error:#}")))?;
            let index = if with_openapi {
                let index = cache
                    .openapi_index()
                    .map_err(|error| CallError::Config(format!("{error:#}")))?;
                Some(index)
            } else {
                None
            };
            Ok((profile, index))
        })
        .await
        .map_err(|error| CallError::Config(format!("runtime config load failed: {error}")))?
    }
}

fn resolve_target(
    request: &CallRequest,
    index: Option<&OpenApiIndex>,
) -> Result<(String, String), CallError> {
    let path = request
        .path
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty());
    let operation_id = request
        .operation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let method = request
        .method
        .as_deref()
        .map(str::trim)
        .filter(|method| !method.is_empty());

    match (path, operation_id) {
        (Some(_), Some(_)) => Err(CallError::InvalidRequest(
            "call accepts either 'path' or 'operationId', not both".to_string(),
        )),
        (Some(path), None) => Ok((
            method.unwrap_or(DEFAULT_CALL_METHOD).to_string(),
            path.to_string(),
        )),
        (None, Some(operation_id)) => {
            let operation = index
                .and_then(|index| index.resolve(operation_id))
                .ok_or_else(|| CallError::UnknownOperation(operation_id.to_string()))?;
            Ok((
                method.unwrap_or(operation.method.as_str()).to_string(),
                operation.path.clone(),
            ))
        }
        (None, None) => Err(CallError::InvalidRequest(
            "call requires a non-empty 'path' or 'operationId'".to_string(),
        )),
    }
}

impl HttpCallExecutor {
    fn build_request(&self, call: &ResolvedCall, attempt: u32) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(call.method.clone(), &call.url)
            .headers(call.headers.clone())
            .header(RETRY_ATTEMPT_HEADER, attempt.to_string());
        if !call.query.is_empty() {
            builder = builder.query(&call.query);
        }
        match call.body.as_ref() {
            None | Some(Value::Null) => builder,
            Some(Value::String(raw)) => builder.body(raw.clone()),
            Some(body) => builder.json(body),
        }
    }

    async fn send_with_retries(
        &self,
        call: &ResolvedCall,
        started_unix_ms: u64,
        started: Instant,
    ) -> Result<CallOutcome, CallError> {
        let mut attempt = 0_u32;
        loop {
            match self.build_request(call, attempt).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt < call.max_retries && should_retry_status(status) {
                        let delay_ms = retry_delay_ms(
                            call.retry_backoff_ms,
                            attempt,
                            parse_retry_after_ms(response.headers()),
                        );
                        debug!(status, attempt, delay_ms, url = %call.url, "retrying call");
                        attempt = attempt.saturating_add(1);
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    let timing = CallTiming {
                        started_unix_ms,
                        duration_ms: 0,
                        attempts: attempt.saturating_add(1),
                    };
                    return read_call_outcome(response, call.max_body_bytes, timing, started)
                        .await;
                }
                Err(error) => {
                    if attempt < call.max_retries && is_retryable_http_error(&error) {
                        let delay_ms = retry_delay_ms(call.retry_backoff_ms, attempt, None);
                        debug!(attempt, delay_ms, %error, "retrying call after transport error");
                        attempt = attempt.saturating_add(1);
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }
                    return Err(CallError::Http(error));
                }
            }
        }
    }
}

#[async_trait]
impl CallExecutor for HttpCallExecutor {
    async fn execute(
        &self,
        request: CallRequest,
        cancel: CancellationToken,
    ) -> Result<CallOutcome, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        let timeout = request.timeout.max(Duration::from_millis(1));
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let call = self.resolve(request).await?;
        let started_unix_ms = current_unix_timestamp_ms();
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.send_with_retries(&call, started_unix_ms, started),
            ) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(CallError::Timeout { timeout_ms }),
            },
        }
    }
}

async fn read_call_outcome(
    mut response: Response,
    max_body_bytes: usize,
    mut timing: CallTiming,
    started: Instant,
) -> Result<CallOutcome, CallError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect::<BTreeMap<_, _>>();

    let mut raw = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response.chunk().await? {
        let remaining = max_body_bytes.saturating_sub(raw.len());
        if chunk.len() > remaining {
            raw.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
        raw.extend_from_slice(&chunk);
    }

    timing.duration_ms = elapsed_ms(started);
    Ok(CallOutcome {
        status,
        headers,
        bytes: u64::try_from(raw.len()).unwrap_or(u64::MAX),
        body: decode_call_body(&raw, truncated),
        truncated,
        timing,
    })
}

fn decode_call_body(raw: &[u8], truncated: bool) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if !truncated {
        if let Ok(value) = serde_json::from_slice::<Value>(raw) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(raw).into_owned())
}

fn fill_path_params(template: &str, params: &BTreeMap<String, String>) -> Result<String, CallError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(length) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + length];
        let value = params.get(name).ok_or_else(|| {
            CallError::InvalidRequest(format!("missing path parameter '{name}'"))
        })?;
        rendered.push_str(&rest[..start]);
        rendered.push_str(value);
        rest = &rest[start + length + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn build_call_url(profile: &RuntimeProfile, path: &str) -> Result<String, CallError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }
    let base = profile.normalized_base_url().ok_or_else(|| {
        CallError::Config(
            "no base_url configured; set base_url in the runtime profile or RELAY_BASE_URL"
                .to_string(),
        )
    })?;
    if path.starts_with('/') {
        Ok(format!("{base}{path}"))
    } else {
        Ok(format!("{base}/{path}"))
    }
}

fn build_call_headers(
    profile: &RuntimeProfile,
    overrides: &BTreeMap<String, String>,
) -> Result<HeaderMap, CallError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &profile.headers {
        insert_header(&mut headers, name, value)?;
    }
    if let Some(token) = profile.resolved_auth_token() {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|error| {
            CallError::Config(format!("invalid auth token header value: {error}"))
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in overrides {
        insert_header(&mut headers, name, value)?;
    }
    Ok(headers)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), CallError> {
    let header_name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|error| CallError::InvalidRequest(format!("invalid header name '{name}': {error}")))?;
    let header_value = HeaderValue::from_str(value).map_err(|error| {
        CallError::InvalidRequest(format!("invalid value for header '{name}': {error}"))
    })?;
    headers.insert(header_name, header_value);
    Ok(())
}
