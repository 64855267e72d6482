//! Client-side session driver: handshake, correlated calls, teardown.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::transport::Transport;
use crate::types::{
    methods, InitializeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, McpError,
    McpResult, ToolCallParams, ToolDefinition, ToolListResult,
};

use super::correlator::{Correlation, Correlator, Resolution};
use super::outcome::CallOutcome;
use super::state::{Handshake, SessionState};

/// One connection to a tool server over any [`Transport`].
///
/// Calls run one at a time: each suspends until its reply arrives or its
/// deadline passes. Transport and protocol faults close the session; a
/// timeout only fails the call it belongs to.
pub struct ClientSession<T: Transport> {
    transport: T,
    config: ClientConfig,
    handshake: Handshake,
    correlator: Correlator,
    server: Option<InitializeResult>,
}

impl<T: Transport> ClientSession<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            handshake: Handshake::new(),
            correlator: Correlator::new(),
            server: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.handshake.state()
    }

    /// What the server said about itself during the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Calls still waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.correlator.outstanding()
    }

    /// Run the handshake: `initialize`, then `notifications/initialized`.
    pub async fn initialize(&mut self) -> McpResult<InitializeResult> {
        let timeout = self.config.handshake_timeout;
        let (id, deadline) = {
            let call = self.correlator.issue(methods::INITIALIZE, timeout);
            (call.id, call.deadline)
        };
        if let Err(e) = self.handshake.begin(id) {
            self.correlator.expire(id);
            return Err(e);
        }

        let params = serde_json::to_value(self.config.initialize_params())?;
        let request = JsonRpcRequest::new(id, methods::INITIALIZE, Some(params));
        if let Err(e) = self.transport.send(&JsonRpcMessage::from(request)).await {
            return Err(self.fail(e));
        }

        let result = loop {
            let received = match tokio::time::timeout_at(deadline, self.transport.receive()).await {
                Ok(received) => received,
                Err(_) => {
                    self.correlator.expire(id);
                    self.handshake.close();
                    return Err(McpError::Timeout {
                        method: methods::INITIALIZE.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => {
                    return Err(self.fail(McpError::Transport(
                        "channel closed during handshake".to_string(),
                    )))
                }
                Err(e) => return Err(self.fail(e)),
            };

            let Some(reply_id) = message.id().filter(|_| message.is_reply()).cloned() else {
                tracing::debug!(method = ?message.method(), "ignoring non-reply during handshake");
                continue;
            };
            if let Err(e) = self.handshake.complete(&reply_id) {
                return Err(self.fail(e));
            }

            self.correlator.resolve(message);
            match self.correlator.take(id) {
                Some(Ok(result)) => break result,
                Some(Err(error)) => {
                    self.handshake.close();
                    return Err(McpError::from(error));
                }
                None => {
                    return Err(self.fail(McpError::Protocol(
                        "handshake reply was not correlated".to_string(),
                    )))
                }
            }
        };

        let info: InitializeResult = match serde_json::from_value(result) {
            Ok(info) => info,
            Err(e) => {
                return Err(self.fail(McpError::Protocol(format!(
                    "malformed initialize result: {e}"
                ))))
            }
        };
        tracing::info!(
            server = %info.server_info.name,
            version = %info.server_info.version,
            protocol = %info.protocol_version,
            "session ready"
        );

        if self.config.send_initialized {
            let notification = JsonRpcNotification::new(methods::INITIALIZED, None);
            if let Err(e) = self.transport.send(&JsonRpcMessage::from(notification)).await {
                return Err(self.fail(e));
            }
        }
        self.server = Some(info.clone());
        Ok(info)
    }

    /// Send a notification. No id, no reply.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> McpResult<()> {
        if self.state() == SessionState::Closed {
            return Err(McpError::NotInitialized {
                state: self.state().to_string(),
            });
        }
        let notification = JsonRpcNotification::new(method, params);
        match self.transport.send(&JsonRpcMessage::from(notification)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.check(e)),
        }
    }

    /// Issue a request under the default call timeout and wait for its result.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let timeout = self.config.call_timeout;
        self.request_with_timeout(method, params, timeout).await
    }

    pub async fn request_with_timeout(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> McpResult<Value> {
        self.handshake.ensure_ready()?;

        let (id, deadline) = {
            let call = self.correlator.issue(method, timeout);
            (call.id, call.deadline)
        };
        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.transport.send(&JsonRpcMessage::from(request)).await {
            self.correlator.expire(id);
            return Err(self.check(e));
        }

        match self.await_reply(id, deadline).await? {
            Some(Ok(result)) => Ok(result),
            Some(Err(error)) => Err(McpError::from(error)),
            None => Err(McpError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Pump the transport until `id` resolves (`Some`) or its deadline
    /// passes (`None`, slot cleared).
    async fn await_reply(&mut self, id: u64, deadline: Instant) -> McpResult<Option<Resolution>> {
        loop {
            if let Some(resolution) = self.correlator.take(id) {
                return Ok(Some(resolution));
            }

            let received = match tokio::time::timeout_at(deadline, self.transport.receive()).await {
                Ok(received) => received,
                Err(_) => {
                    self.correlator.expire(id);
                    return Ok(None);
                }
            };

            match received {
                Ok(Some(message)) => match self.correlator.resolve(message) {
                    Correlation::Resolved(_) | Correlation::Unmatched(_) => {}
                    Correlation::Uncorrelated => {
                        tracing::debug!("ignoring peer-initiated message");
                    }
                },
                Ok(None) => {
                    return Err(self.fail(McpError::Transport(format!(
                        "channel closed while waiting for reply {id}"
                    ))))
                }
                Err(e) => {
                    self.correlator.expire(id);
                    return Err(self.check(e));
                }
            }
        }
    }

    /// Discover the server's tools.
    pub async fn list_tools(&mut self) -> McpResult<Vec<ToolDefinition>> {
        let result = self.request(methods::TOOLS_LIST, None).await?;
        let list: ToolListResult = decode_result(result)?;
        Ok(list.tools)
    }

    /// Raw `tools/call` result, before outcome classification.
    pub async fn call_tool_raw(&mut self, name: &str, arguments: Value) -> McpResult<Value> {
        let params = serde_json::to_value(ToolCallParams::new(name, arguments))?;
        self.request(methods::TOOLS_CALL, Some(params)).await
    }

    /// Invoke a tool and classify the reply.
    ///
    /// A JSON-RPC error reply becomes [`CallOutcome::Rejected`]; timeouts and
    /// connection faults stay errors.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> McpResult<CallOutcome> {
        match self.call_tool_raw(name, arguments).await {
            Ok(result) => Ok(CallOutcome::from_result(&result)),
            Err(McpError::Server { message, .. }) => Ok(CallOutcome::Rejected(message)),
            Err(e) => Err(e),
        }
    }

    pub async fn ping(&mut self) -> McpResult<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// Close the session and release the transport. Idempotent.
    pub async fn close(&mut self) -> McpResult<()> {
        self.handshake.close();
        self.correlator.clear();
        self.transport.close().await
    }

    /// Consume the session, closing it, and hand back the transport.
    pub async fn into_transport(mut self) -> McpResult<T> {
        self.close().await?;
        Ok(self.transport)
    }

    /// Close the session on `error` and hand it back.
    fn fail(&mut self, error: McpError) -> McpError {
        tracing::error!(error = %error, state = %self.state(), "session failed");
        self.correlator.clear();
        self.handshake.close();
        error
    }

    /// Like [`Self::fail`], but only for transport and protocol faults.
    fn check(&mut self, error: McpError) -> McpError {
        if error.is_fatal() {
            self.fail(error)
        } else {
            error
        }
    }
}

fn decode_result<R: DeserializeOwned>(result: Value) -> McpResult<R> {
    serde_json::from_value(result).map_err(|e| McpError::Protocol(format!("malformed result: {e}")))
}

impl<T: Transport> std::fmt::Debug for ClientSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeTransport;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    type TestSession = ClientSession<PipeTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>;

    fn pair() -> (TestSession, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (read, write) = tokio::io::split(client);
        let config = ClientConfig {
            handshake_timeout: Duration::from_millis(500),
            call_timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        };
        (ClientSession::new(PipeTransport::new(read, write), config), BufReader::new(server))
    }

    async fn read_envelope(server: &mut BufReader<DuplexStream>) -> Value {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn write_line(server: &mut BufReader<DuplexStream>, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        server.get_mut().write_all(line.as_bytes()).await.unwrap();
    }

    fn init_result() -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "fake", "version": "0.0.1"}
        })
    }

    #[tokio::test]
    async fn test_call_before_initialize_fails_fast() {
        let (mut session, _server) = pair();
        let err = session.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::NotInitialized { .. }));
        assert_eq!(session.outstanding(), 0);
        assert_eq!(session.state(), SessionState::Unconnected);
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let (mut session, mut server) = pair();
        let peer = tokio::spawn(async move {
            let init = read_envelope(&mut server).await;
            assert_eq!(init["method"], "initialize");
            assert_eq!(init["id"], 1);
            write_line(&mut server, json!({"jsonrpc": "2.0", "method": "notifications/message"})).await;
            write_line(&mut server, json!({"jsonrpc": "2.0", "id": 1, "result": init_result()})).await;
            let initialized = read_envelope(&mut server).await;
            assert_eq!(initialized["method"], "notifications/initialized");
            assert!(initialized.get("id").is_none());
            server
        });

        let info = session.initialize().await.unwrap();
        assert_eq!(info.server_info.name, "fake");
        assert_eq!(session.state(), SessionState::Ready);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_initialized_send_failure_closes() {
        let (mut session, mut server) = pair();
        let peer = tokio::spawn(async move {
            read_envelope(&mut server).await;
            write_line(&mut server, json!({"jsonrpc": "2.0", "id": 1, "result": init_result()})).await;
            drop(server);
        });

        let err = session.initialize().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.server_info().is_none());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_id_mismatch_closes() {
        let (mut session, mut server) = pair();
        let peer = tokio::spawn(async move {
            read_envelope(&mut server).await;
            write_line(&mut server, json!({"jsonrpc": "2.0", "id": 7, "result": init_result()})).await;
            server
        });

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::Protocol(_)));
        assert_eq!(session.state(), SessionState::Closed);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_error_payload_closes() {
        let (mut session, mut server) = pair();
        let peer = tokio::spawn(async move {
            read_envelope(&mut server).await;
            write_line(
                &mut server,
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32603, "message": "boom"}}),
            )
            .await;
            server
        });

        let err = session.initialize().await.unwrap_err();
        assert_eq!(err.code(), -32603);
        assert_eq!(session.state(), SessionState::Closed);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout_closes() {
        let (mut session, _server) = pair();
        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_eof_during_call_closes() {
        let (mut session, mut server) = pair();
        let peer = tokio::spawn(async move {
            read_envelope(&mut server).await;
            write_line(&mut server, json!({"jsonrpc": "2.0", "id": 1, "result": init_result()})).await;
            read_envelope(&mut server).await;
            read_envelope(&mut server).await;
            drop(server);
        });

        session.initialize().await.unwrap();
        let err = session.list_tools().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), SessionState::Closed);
        peer.await.unwrap();
    }
}
