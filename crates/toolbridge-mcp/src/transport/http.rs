//! HTTP client transport: one POST per logical request.
//!
//! There is no persistent duplex stream. [`HttpTransport::send`] only queues
//! a request; the POST happens in [`HttpTransport::receive`], so the whole
//! network exchange runs under the caller's deadline. The response body is
//! either a single JSON document or one SSE event. With nothing queued and
//! nothing buffered, `receive` never returns; the caller's deadline drops it.

use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing::{self, Framing, SSE_CONTENT_TYPE};
use super::Transport;

/// Client side of the HTTP binding.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    queued: VecDeque<JsonRpcMessage>,
    inbox: VecDeque<JsonRpcMessage>,
}

impl HttpTransport {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("toolbridge-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.to_string(),
            token: None,
            queued: VecDeque::new(),
            inbox: VecDeque::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, message: &JsonRpcMessage) -> McpResult<(StatusCode, Option<String>, String)> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, format!("application/json, {SSE_CONTENT_TYPE}"))
            .json(message);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST {} failed: {e}", self.url)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| McpError::Transport(format!("reading response body failed: {e}")))?;

        tracing::debug!(%status, method = ?message.method(), bytes = body.len(), "HTTP exchange");
        Ok((status, content_type, body))
    }

    /// Perform one queued exchange and stash whatever came back.
    async fn exchange(&mut self, message: JsonRpcMessage) -> McpResult<()> {
        let (status, content_type, body) = self.post(&message).await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::Unauthorized);
        }

        let decoded = decode_response(content_type.as_deref(), &body);
        if decoded.is_empty() && !status.is_success() {
            return Err(McpError::Transport(format!("HTTP {status} from {}", self.url)));
        }
        self.inbox.extend(decoded);
        Ok(())
    }
}

/// Decode a response body according to its content type.
fn decode_response(content_type: Option<&str>, body: &str) -> Vec<JsonRpcMessage> {
    let is_sse = content_type.is_some_and(|ct| ct.starts_with(SSE_CONTENT_TYPE))
        || body.trim_start().starts_with(framing::SSE_DATA_PREFIX);
    if is_sse {
        return framing::decode_body(body, Framing::Sse).collect();
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<JsonRpcMessage>(trimmed) {
        Ok(msg) => vec![msg],
        Err(e) => {
            tracing::warn!(error = %e, "response body is not an envelope");
            Vec::new()
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: &JsonRpcMessage) -> McpResult<()> {
        match message {
            JsonRpcMessage::Request(_) => {
                self.queued.push_back(message.clone());
                Ok(())
            }
            // Nothing to correlate: deliver now, expect an empty 202.
            _ => {
                let (status, _, _) = self.post(message).await?;
                if status == StatusCode::UNAUTHORIZED {
                    return Err(McpError::Unauthorized);
                }
                if !status.is_success() {
                    tracing::warn!(%status, method = ?message.method(), "notification rejected");
                }
                Ok(())
            }
        }
    }

    async fn receive(&mut self) -> McpResult<Option<JsonRpcMessage>> {
        loop {
            if let Some(msg) = self.inbox.pop_front() {
                return Ok(Some(msg));
            }
            // A request abandoned mid-exchange is not retried.
            let Some(next) = self.queued.pop_front() else {
                return std::future::pending().await;
            };
            self.exchange(next).await?;
        }
    }

    async fn close(&mut self) -> McpResult<()> {
        self.queued.clear();
        self.inbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_json_body() {
        let msgs = decode_response(
            Some("application/json"),
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#,
        );
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_decode_sse_body() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}\n\n";
        let msgs = decode_response(Some("text/event-stream; charset=utf-8"), body);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id().and_then(|id| id.as_u64()), Some(3));

        // Servers that mislabel SSE as JSON are still understood.
        assert_eq!(decode_response(Some("application/json"), body).len(), 1);
    }

    #[test]
    fn test_decode_empty_and_garbage() {
        assert!(decode_response(None, "").is_empty());
        assert!(decode_response(Some("text/html"), "<html>502</html>").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_with_nothing_queued_waits() {
        let mut transport = HttpTransport::new("http://127.0.0.1:9/mcp");
        let waited = tokio::time::timeout(Duration::from_secs(5), transport.receive()).await;
        assert!(waited.is_err(), "an idle transport is not a closed one");
    }
}
