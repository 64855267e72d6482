//! Stdio server transport: JSON-RPC in on stdin, out on stdout.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::ProtocolHandler;
use crate::types::{McpError, McpResult, RequestId};

use super::framing;

/// Newline-delimited server loop for pipe-launched servers.
pub struct StdioTransport {
    handler: ProtocolHandler,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self { handler }
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn run(&self) -> McpResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve on any reader/writer pair until the reader hits EOF.
    ///
    /// Lines that do not parse get a `-32700` reply with a null id; the loop
    /// carries on.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> McpResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        tracing::info!("Stdio transport started");

        loop {
            buf.clear();
            let bytes_read = reader.read_until(b'\n', &mut buf).await.map_err(McpError::Io)?;

            if bytes_read == 0 {
                tracing::info!("EOF on stdin, shutting down");
                break;
            }

            let parsed = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => framing::parse_message(line.trim()),
                Err(e) => Err(McpError::ParseError(format!("line is not UTF-8: {e}"))),
            };

            let reply = match parsed {
                Ok(msg) => self.handler.handle_message(msg).await,
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    Some(serde_json::to_value(e.to_json_rpc_error(RequestId::Null))?)
                }
            };

            if let Some(reply) = reply {
                let framed = framing::frame_message(&reply)?;
                writer
                    .write_all(framed.as_bytes())
                    .await
                    .map_err(McpError::Io)?;
                writer.flush().await.map_err(McpError::Io)?;
            }
        }

        Ok(())
    }
}
