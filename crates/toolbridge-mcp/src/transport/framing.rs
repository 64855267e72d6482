//! Message framing: newline-delimited JSON and single-event SSE.
//!
//! Encoding and decoding are independent. The strict [`parse_message`] is
//! used by the server loop, which answers garbage with a parse error. The
//! lenient decoders ([`decode_line`], [`decode_body`], [`FrameDecoder`])
//! skip anything that is not an envelope, since a child's stdout may carry
//! stray diagnostic text.

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::types::{JsonRpcMessage, McpError, McpResult};

/// SSE field prefix for event payload lines.
pub const SSE_DATA_PREFIX: &str = "data:";

/// Content type of an SSE response body.
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Wire framing for envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line.
    Stdio,
    /// `data: <json>` followed by a blank line.
    Sse,
}

/// Parse a single line of text as a JSON-RPC message.
pub fn parse_message(line: &str) -> McpResult<JsonRpcMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(McpError::ParseError("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| McpError::ParseError(e.to_string()))
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &Value) -> McpResult<String> {
    encode_value(value, Framing::Stdio)
}

/// Encode any serializable envelope under the given framing.
pub fn encode_value(value: &impl serde::Serialize, framing: Framing) -> McpResult<String> {
    let json = serde_json::to_string(value).map_err(McpError::Json)?;
    Ok(match framing {
        Framing::Stdio => {
            let mut line = json;
            line.push('\n');
            line
        }
        Framing::Sse => format!("data: {json}\n\n"),
    })
}

/// Encode an envelope under the given framing.
pub fn encode(message: &JsonRpcMessage, framing: Framing) -> McpResult<String> {
    encode_value(message, framing)
}

/// Try one line as an envelope. Returns `None` for anything that is not one.
pub fn decode_line(line: &str, framing: Framing) -> Option<JsonRpcMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = match framing {
        Framing::Stdio => line.trim(),
        Framing::Sse => {
            let rest = line.strip_prefix(SSE_DATA_PREFIX)?;
            rest.strip_prefix(' ').unwrap_or(rest).trim()
        }
    };
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<JsonRpcMessage>(payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(error = %e, line = %truncate(payload, 200), "skipping non-envelope line");
            None
        }
    }
}

/// Decode every envelope in a fully buffered body.
pub fn decode_body(body: &str, framing: Framing) -> impl Iterator<Item = JsonRpcMessage> + '_ {
    body.lines().filter_map(move |line| decode_line(line, framing))
}

/// Lazy envelope decoder over a buffered byte stream.
///
/// Partial lines survive cancellation of [`FrameDecoder::next_message`]:
/// bytes already read stay in the internal buffer and the next call resumes
/// the same line. [`FrameDecoder::into_inner`] hands the reader back so a new
/// decoder can pick up where this one stopped.
pub struct FrameDecoder<R> {
    reader: R,
    framing: Framing,
    buf: Vec<u8>,
    skipped: u64,
}

impl<R: AsyncBufRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R, framing: Framing) -> Self {
        Self {
            reader,
            framing,
            buf: Vec::new(),
            skipped: 0,
        }
    }

    /// Next envelope, `Ok(None)` at end of stream.
    pub async fn next_message(&mut self) -> McpResult<Option<JsonRpcMessage>> {
        loop {
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| McpError::Transport(format!("read failed: {e}")))?;

            let at_eof = n == 0 || !self.buf.ends_with(b"\n");
            if self.buf.is_empty() {
                return Ok(None);
            }
            if at_eof && n != 0 {
                // Unterminated tail: keep reading until newline or EOF.
                continue;
            }

            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();

            if let Some(msg) = decode_line(&line, self.framing) {
                return Ok(Some(msg));
            }
            if !line.trim().is_empty() && self.counts_as_skip(&line) {
                self.skipped += 1;
            }
            if n == 0 {
                return Ok(None);
            }
        }
    }

    fn counts_as_skip(&self, line: &str) -> bool {
        match self.framing {
            Framing::Stdio => true,
            Framing::Sse => line.starts_with(SSE_DATA_PREFIX),
        }
    }

    /// Lines discarded so far because they did not decode.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Adapt into a stream that ends at EOF or after the first read error.
    pub fn into_stream(self) -> impl Stream<Item = McpResult<JsonRpcMessage>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_message().await {
                Ok(Some(msg)) => Some((Ok(msg), Some(decoder))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcNotification, JsonRpcRequest};
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn test_encode_stdio_and_sse() {
        let msg: JsonRpcMessage = JsonRpcRequest::new(1u64, "tools/list", None).into();
        let line = encode(&msg, Framing::Stdio).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let event = encode(&msg, Framing::Sse).unwrap();
        assert!(event.starts_with("data: {"));
        assert!(event.ends_with("}\n\n"));
    }

    #[test]
    fn test_decode_line_skips_diagnostics() {
        assert!(decode_line(">>> S3 MCP Server starting up...", Framing::Stdio).is_none());
        assert!(decode_line("{\"broken\":", Framing::Stdio).is_none());
        assert!(decode_line("", Framing::Stdio).is_none());
        let msg = decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, Framing::Stdio);
        assert!(msg.is_some());
    }

    #[test]
    fn test_decode_sse_requires_data_prefix() {
        let body = "event: message\n\
                    id: 4\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"tools\":[]}}\n\
                    \n";
        let msgs: Vec<_> = decode_body(body, Framing::Sse).collect();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_reply());

        // A bare JSON line is not an SSE event.
        assert!(decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, Framing::Sse).is_none());
        // Prefix without the optional space still counts.
        assert!(decode_line(r#"data:{"jsonrpc":"2.0","id":1,"result":{}}"#, Framing::Sse).is_some());
    }

    #[tokio::test]
    async fn test_frame_decoder_interleaved_stream() {
        let input = concat!(
            "booting...\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n",
            "{\"oops\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\r\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}",
        );
        let mut decoder = FrameDecoder::new(input.as_bytes(), Framing::Stdio);

        let first = decoder.next_message().await.unwrap().unwrap();
        assert_eq!(first.method(), Some("notifications/message"));
        let second = decoder.next_message().await.unwrap().unwrap();
        assert_eq!(second.id().and_then(|i| i.as_u64()), Some(1));
        // Last line has no trailing newline but is still delivered at EOF.
        let third = decoder.next_message().await.unwrap().unwrap();
        assert_eq!(third.id().and_then(|i| i.as_u64()), Some(2));
        assert!(decoder.next_message().await.unwrap().is_none());
        assert_eq!(decoder.skipped(), 2);
    }

    #[tokio::test]
    async fn test_frame_decoder_restartable() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":2}\n",
        );
        let mut decoder = FrameDecoder::new(input.as_bytes(), Framing::Stdio);
        decoder.next_message().await.unwrap().unwrap();

        let mut resumed = FrameDecoder::new(decoder.into_inner(), Framing::Stdio);
        let msg = resumed.next_message().await.unwrap().unwrap();
        assert_eq!(msg.id().and_then(|i| i.as_u64()), Some(2));
    }

    #[tokio::test]
    async fn test_into_stream_collects_envelopes() {
        let notif = JsonRpcNotification::new("notifications/initialized", None);
        let mut input = encode(&notif.into(), Framing::Sse).unwrap();
        input.push_str(": keep-alive comment\n\n");
        input.push_str(&encode_value(&json!({"jsonrpc": "2.0", "id": 9, "result": {}}), Framing::Sse).unwrap());

        let stream = FrameDecoder::new(input.as_bytes(), Framing::Sse).into_stream();
        let msgs: Vec<_> = stream.collect().await;
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.is_ok()));
    }

    #[test]
    fn test_parse_message_strict() {
        assert_eq!(parse_message("").unwrap_err().code(), -32700);
        assert_eq!(parse_message("{\"broken\":").unwrap_err().code(), -32700);
        assert!(parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).is_ok());
    }
}
