//! Client session against in-memory peers: the real stdio server loop, and
//! a scripted peer for timing behaviour.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use toolbridge_mcp::config::{ClientConfig, ServerConfig};
use toolbridge_mcp::protocol::ProtocolHandler;
use toolbridge_mcp::session::{CallOutcome, ClientSession, SessionState};
use toolbridge_mcp::tools::builtin_registry;
use toolbridge_mcp::transport::{PipeTransport, StdioTransport};
use toolbridge_mcp::types::McpError;

type DuplexSession = ClientSession<PipeTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>;

fn session_over(stream: DuplexStream, config: ClientConfig) -> DuplexSession {
    let (read, write) = tokio::io::split(stream);
    ClientSession::new(PipeTransport::new(read, write), config)
}

/// Client session wired to `StdioTransport::serve` running the built-in tools.
fn served(config: ServerConfig) -> (DuplexSession, tokio::task::JoinHandle<()>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handler = ProtocolHandler::new(Arc::new(builtin_registry().unwrap()), config);

    let task = tokio::spawn(async move {
        let (read, write) = tokio::io::split(server);
        StdioTransport::new(handler).serve(read, write).await.unwrap();
    });

    (session_over(client, ClientConfig::default()), task)
}

#[tokio::test]
async fn test_full_exchange_over_stdio_loop() {
    let (mut session, server) = served(ServerConfig::default());

    let info = session.initialize().await.unwrap();
    assert_eq!(info.server_info.name, "toolbridge-mcp");
    assert_eq!(session.state(), SessionState::Ready);

    let tools = session.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "echo"));

    let outcome = session.call_tool("echo", json!({"message": "hi"})).await.unwrap();
    assert_eq!(outcome, CallOutcome::Success(json!({"message": "hi"})));

    let outcome = session.call_tool("echo", json!({})).await.unwrap();
    assert!(matches!(outcome, CallOutcome::ToolFailed(ref m) if m.contains("message")));

    let outcome = session.call_tool("nope", json!({})).await.unwrap();
    assert_eq!(outcome, CallOutcome::Rejected("Unknown tool: nope".to_string()));

    session.ping().await.unwrap();
    assert_eq!(session.outstanding(), 0);

    // Closing our write side is EOF for the server loop.
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    server.await.unwrap();
}

#[tokio::test]
async fn test_readonly_outcome_over_stdio_loop() {
    let (mut session, _server) = served(ServerConfig::with_readonly(true));
    session.initialize().await.unwrap();

    let outcome = session
        .call_tool("putObject", json!({"key": "k", "body": "v"}))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CallOutcome::ToolFailed("Mutation not allowed: server is in readonly mode".to_string())
    );
}

#[tokio::test]
async fn test_method_not_found_keeps_session_ready() {
    let (mut session, _server) = served(ServerConfig::default());
    session.initialize().await.unwrap();

    let err = session.request("resources/list", None).await.unwrap_err();
    assert_eq!(err.code(), -32601);
    assert_eq!(session.state(), SessionState::Ready, "server errors are not fatal");
}

#[tokio::test]
async fn test_non_utf8_line_gets_parse_error_and_loop_continues() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handler = ProtocolHandler::new(Arc::new(builtin_registry().unwrap()), ServerConfig::default());
    let server = tokio::spawn(async move {
        let (read, write) = tokio::io::split(server);
        StdioTransport::new(handler).serve(read, write).await
    });

    let mut client = BufReader::new(client);
    client.get_mut().write_all(b"\xff\xfe garbage\n").await.unwrap();
    client
        .get_mut()
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();

    let mut line = String::new();
    client.read_line(&mut line).await.unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    line.clear();
    client.read_line(&mut line).await.unwrap();
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["id"], 1);
    assert!(reply.get("error").is_none());

    drop(client);
    server.await.unwrap().unwrap();
}

// ─────────────────────── scripted peer ───────────────────────

/// Answers `initialize` at once, delays the reply to request id 2 by
/// `delay`, and answers every other request immediately.
async fn slow_peer(stream: DuplexStream, delay: Duration) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await.unwrap() == 0 {
            return;
        }
        let msg: Value = serde_json::from_str(&line).unwrap();
        let Some(id) = msg.get("id").cloned() else {
            continue;
        };

        let result = if msg["method"] == "initialize" {
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": {"name": "slow", "version": "0.0.1"}
            })
        } else {
            if id == 2 {
                tokio::time::sleep(delay).await;
            }
            json!({"content": [{"type": "text", "text": json!({"id": id}).to_string()}]})
        };

        let mut reply = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
        reply.push('\n');
        reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_reply_is_discarded() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(slow_peer(server, Duration::from_millis(700)));

    let config = ClientConfig {
        call_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    };
    let mut session = session_over(client, config);
    session.initialize().await.unwrap();

    let err = session.call_tool("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 500, .. }));
    assert_eq!(session.state(), SessionState::Ready, "timeouts are not fatal");
    assert_eq!(session.outstanding(), 0);

    // The reply to id 2 lands while id 3 is pending and must not resolve it.
    let outcome = session.call_tool("fast", json!({})).await.unwrap();
    assert_eq!(outcome, CallOutcome::Success(json!({"id": 3})));
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_deadline_is_short() {
    let (client, _server) = tokio::io::duplex(1024);
    let mut session = session_over(client, ClientConfig::default());

    let started = tokio::time::Instant::now();
    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 2000, .. }));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2100));
    assert_eq!(session.state(), SessionState::Closed);

    let err = session.call_tool("echo", json!({"message": "x"})).await.unwrap_err();
    assert!(matches!(err, McpError::NotInitialized { .. }));
}
