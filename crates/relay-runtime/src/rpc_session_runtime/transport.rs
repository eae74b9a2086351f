use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use super::{
    parsing::{read_bounded_line, RpcInputLine},
    decode_rpc_request, RpcResponse, RpcSessionEnd, RpcSessionError, RpcWorkItem,
    RPC_CODE_INTERNAL,
};

#[derive(Debug)]
pub(super) struct RpcIngestSummary {
    pub(super) processed_lines: usize,
    pub(super) accepted_requests: usize,
    pub(super) framing_errors: usize,
    pub(super) end: RpcSessionEnd,
    pub(super) read_error: Option<std::io::Error>,
}

#[derive(Debug, Default)]
pub(super) struct RpcWriteSummary {
    pub(super) responses_written: usize,
    pub(super) error_responses: usize,
    pub(super) error: Option<RpcSessionError>,
}

/// Reads request lines until EOF, `shutdown`, or an I/O error.
///
/// Decoded requests go to the work queue; framing errors go straight to the
/// results channel. Dropping both senders on return lets the pool and the
/// writer drain.
pub(super) async fn ingest_rpc_requests<R>(
    mut reader: R,
    max_line_bytes: usize,
    queue: mpsc::Sender<RpcWorkItem>,
    results: mpsc::Sender<RpcResponse>,
) -> RpcIngestSummary
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = RpcIngestSummary {
        processed_lines: 0,
        accepted_requests: 0,
        framing_errors: 0,
        end: RpcSessionEnd::Eof,
        read_error: None,
    };

    loop {
        let line = match read_bounded_line(&mut reader, max_line_bytes).await {
            Ok(line) => line,
            Err(read_error) => {
                warn!(error = %read_error, "rpc input read failed; draining session");
                summary.end = RpcSessionEnd::ReadError;
                summary.read_error = Some(read_error);
                break;
            }
        };
        let raw = match line {
            RpcInputLine::Eof => break,
            RpcInputLine::Oversized { bytes } => {
                summary.processed_lines = summary.processed_lines.saturating_add(1);
                summary.framing_errors = summary.framing_errors.saturating_add(1);
                warn!(bytes, max_line_bytes, "rejecting oversized rpc input line");
                let response = RpcResponse::framing_error(format!(
                    "line exceeds {max_line_bytes} bytes"
                ));
                let _ = results.send(response).await;
                continue;
            }
            RpcInputLine::Line(raw) => raw,
        };
        let trimmed = raw.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        summary.processed_lines = summary.processed_lines.saturating_add(1);

        let request = match decode_rpc_request(trimmed) {
            Ok(request) => request,
            Err(decode_error) => {
                summary.framing_errors = summary.framing_errors.saturating_add(1);
                let reason = format!("{decode_error:#}");
                debug!(error = %reason, "rejecting malformed rpc input line");
                let _ = results.send(RpcResponse::framing_error(reason)).await;
                continue;
            }
        };

        let is_shutdown = request.is_shutdown();
        summary.accepted_requests = summary.accepted_requests.saturating_add(1);
        if let Err(rejected) = queue.send(RpcWorkItem::new(request)).await {
            let request = rejected.0.request;
            error!(op = %request.op, "rpc work queue closed before request was queued");
            let _ = results
                .send(RpcResponse::failure(
                    request.id,
                    RPC_CODE_INTERNAL,
                    "rpc worker pool unavailable",
                ))
                .await;
        }
        if is_shutdown {
            info!("rpc shutdown requested; ignoring remaining input");
            summary.end = RpcSessionEnd::Shutdown;
            break;
        }
    }

    summary
}

/// Single writer emitting one NDJSON line per response in completion order.
///
/// After a write failure the channel is still drained so workers never block
/// on a dead output stream.
pub(super) async fn write_rpc_responses<W>(
    mut results: mpsc::Receiver<RpcResponse>,
    writer: &mut W,
) -> RpcWriteSummary
where
    W: AsyncWrite + Unpin,
{
    let mut summary = RpcWriteSummary::default();
    while let Some(response) = results.recv().await {
        if summary.error.is_some() {
            continue;
        }
        match write_rpc_response_line(writer, &response).await {
            Ok(()) => {
                summary.responses_written = summary.responses_written.saturating_add(1);
                if !response.ok {
                    summary.error_responses = summary.error_responses.saturating_add(1);
                }
            }
            Err(write_error) => {
                error!(error = %write_error, "rpc response write failed; discarding remaining output");
                summary.error = Some(write_error);
            }
        }
    }
    summary
}

async fn write_rpc_response_line<W>(
    writer: &mut W,
    response: &RpcResponse,
) -> Result<(), RpcSessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response).map_err(RpcSessionError::Serialize)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(RpcSessionError::Write)?;
    writer.flush().await.map_err(RpcSessionError::Write)?;
    Ok(())
}
