//! Subprocess transport: stdio framing over a child's stdin/stdout.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

use crate::config::{LaunchSpec, StopPolicy};
use crate::lifecycle::{self, ExitReport, ProcessHandle};
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing::{self, FrameDecoder, Framing};
use super::Transport;

/// Newline-delimited envelopes over any reader/writer pair.
pub struct PipeTransport<R, W> {
    decoder: FrameDecoder<BufReader<R>>,
    writer: Option<W>,
}

impl<R, W> PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            decoder: FrameDecoder::new(BufReader::new(reader), Framing::Stdio),
            writer: Some(writer),
        }
    }

    /// Lines skipped on the read side because they were not envelopes.
    pub fn skipped(&self) -> u64 {
        self.decoder.skipped()
    }
}

#[async_trait]
impl<R, W> Transport for PipeTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &JsonRpcMessage) -> McpResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| McpError::Transport("channel closed".to_string()))?;
        let line = framing::encode(message, Framing::Stdio)?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("flush failed: {e}")))?;
        tracing::debug!(method = ?message.method(), id = ?message.id(), "sent envelope");
        Ok(())
    }

    async fn receive(&mut self) -> McpResult<Option<JsonRpcMessage>> {
        self.decoder.next_message().await
    }

    async fn close(&mut self) -> McpResult<()> {
        if let Some(mut writer) = self.writer.take() {
            // Peer may already be gone; EOF on its stdin is all we need.
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

/// A spawned server process and the pipe transport to it.
///
/// Closing the transport closes the child's stdin and then stops the process
/// under the configured [`StopPolicy`].
pub struct ChildTransport {
    pipe: PipeTransport<ChildStdout, ChildStdin>,
    process: ProcessHandle,
    policy: StopPolicy,
    exit: Option<ExitReport>,
}

impl ChildTransport {
    /// Spawn the server described by `spec` and connect to its pipes.
    pub fn open(spec: &LaunchSpec, policy: StopPolicy) -> McpResult<Self> {
        let mut process = lifecycle::start(spec)?;
        let (stdin, stdout) = match (process.take_stdin(), process.take_stdout()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(McpError::Spawn {
                    command: spec.command.clone(),
                    reason: "child pipes unavailable".to_string(),
                })
            }
        };

        Ok(Self {
            pipe: PipeTransport::new(stdout, stdin),
            process,
            policy,
            exit: None,
        })
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    /// How the child ended, once the transport has been closed.
    pub fn exit_report(&self) -> Option<&ExitReport> {
        self.exit.as_ref()
    }
}

#[async_trait]
impl Transport for ChildTransport {
    async fn send(&mut self, message: &JsonRpcMessage) -> McpResult<()> {
        self.pipe.send(message).await
    }

    async fn receive(&mut self) -> McpResult<Option<JsonRpcMessage>> {
        let next = self.pipe.receive().await?;
        if next.is_none() {
            tracing::debug!(
                pid = ?self.process.pid(),
                stderr_tail = ?self.process.diagnostics(),
                "child closed stdout"
            );
        }
        Ok(next)
    }

    async fn close(&mut self) -> McpResult<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.pipe.close().await?;
        let report = lifecycle::stop(&mut self.process, &self.policy).await?;
        self.exit = Some(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonRpcRequest;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    #[tokio::test]
    async fn test_pipe_send_writes_one_line() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_end);
        let mut transport = PipeTransport::new(client_read, client_write);

        let msg: JsonRpcMessage = JsonRpcRequest::new(1u64, "ping", None).into();
        transport.send(&msg).await.unwrap();

        let mut reader = BufReader::new(server_end);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"method\":\"ping\""));
    }

    #[tokio::test]
    async fn test_pipe_reassembles_split_lines() {
        let reader = tokio_test::io::Builder::new()
            .read(b"starting up\n{\"jsonrpc\":\"2.0\",")
            .read(b"\"id\":1,\"result\":{}}\n")
            .build();
        let mut transport = PipeTransport::new(reader, tokio::io::sink());

        let msg = transport.receive().await.unwrap().unwrap();
        assert_eq!(msg.id().and_then(|id| id.as_u64()), Some(1));
        assert_eq!(transport.skipped(), 1);
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pipe_receive_returns_none_on_eof() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_end);
        let mut transport = PipeTransport::new(client_read, client_write);
        drop(server_end);
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_is_transport_error() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_end);
        let mut transport = PipeTransport::new(client_read, client_write);
        transport.close().await.unwrap();

        let msg: JsonRpcMessage = JsonRpcRequest::new(1u64, "ping", None).into();
        let err = transport.send(&msg).await.unwrap_err();
        assert!(err.is_fatal());

        let mut rest = Vec::new();
        server_end.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
