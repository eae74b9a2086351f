use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::RpcRequest;

/// Decodes one trimmed NDJSON line into a request envelope.
pub fn decode_rpc_request(raw: &[u8]) -> Result<RpcRequest> {
    let request =
        serde_json::from_slice::<RpcRequest>(raw).context("failed to parse request JSON")?;
    if matches!(request.id, Some(Value::Array(_)) | Some(Value::Object(_))) {
        bail!("request id must be a JSON scalar");
    }
    Ok(request)
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum RpcInputLine {
    Line(Vec<u8>),
    Oversized { bytes: usize },
    Eof,
}

/// Reads one `\n`-terminated line, refusing to buffer more than `max_line_bytes`.
///
/// An oversized line is still consumed through its newline so the next read
/// starts on a fresh line.
pub(super) async fn read_bounded_line<R>(
    reader: &mut R,
    max_line_bytes: usize,
) -> std::io::Result<RpcInputLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut total = 0_usize;
    let mut oversized = false;

    loop {
        let (consumed, found_newline) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                (0, false)
            } else {
                let (length, found_newline) =
                    match available.iter().position(|byte| *byte == b'\n') {
                        Some(index) => (index + 1, true),
                        None => (available.len(), false),
                    };
                if !oversized {
                    line.extend_from_slice(&available[..length]);
                    let content_len = line.len() - usize::from(line.last() == Some(&b'\n'));
                    if content_len > max_line_bytes {
                        oversized = true;
                        line = Vec::new();
                    }
                }
                (length, found_newline)
            }
        };
        if consumed == 0 {
            if total == 0 {
                return Ok(RpcInputLine::Eof);
            }
            break;
        }
        reader.consume(consumed);
        total = total.saturating_add(consumed);
        if found_newline {
            break;
        }
    }

    if oversized {
        return Ok(RpcInputLine::Oversized { bytes: total });
    }
    Ok(RpcInputLine::Line(line))
}
