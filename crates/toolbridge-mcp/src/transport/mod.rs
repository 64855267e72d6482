//! Transport layer: the envelope channel contract and its implementations.
//!
//! Client side: [`PipeTransport`] / [`ChildTransport`] (stdio framing over a
//! child's pipes) and [`HttpTransport`] (one POST per request). Server side:
//! [`StdioTransport`] and, behind the `sse` feature, [`SseServer`].

pub mod child;
pub mod framing;
pub mod http;
#[cfg(feature = "sse")]
pub mod sse;
pub mod stdio;

use async_trait::async_trait;

use crate::config::{LaunchSpec, StopPolicy};
use crate::types::{JsonRpcMessage, McpResult};

pub use child::{ChildTransport, PipeTransport};
pub use framing::{FrameDecoder, Framing};
pub use http::HttpTransport;
#[cfg(feature = "sse")]
pub use sse::SseServer;
pub use stdio::StdioTransport;

/// A bidirectional envelope channel as seen by a client session.
#[async_trait]
pub trait Transport: Send {
    /// Write one envelope. Fails with a transport error on a broken channel.
    async fn send(&mut self, message: &JsonRpcMessage) -> McpResult<()>;

    /// Next decoded envelope, or `Ok(None)` once the channel has closed.
    ///
    /// Must be cancel-safe: the session drops this future when a deadline
    /// passes and calls it again later.
    async fn receive(&mut self) -> McpResult<Option<JsonRpcMessage>>;

    /// Release the channel and anything backing it.
    async fn close(&mut self) -> McpResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: &JsonRpcMessage) -> McpResult<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> McpResult<Option<JsonRpcMessage>> {
        (**self).receive().await
    }

    async fn close(&mut self) -> McpResult<()> {
        (**self).close().await
    }
}

/// Where a client connects: a server launched as a child, or an HTTP URL.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Child(LaunchSpec),
    Http { url: String, token: Option<String> },
}

impl Endpoint {
    /// Open a fresh channel. For [`Endpoint::Child`] this spawns the process.
    pub fn open(&self, policy: &StopPolicy) -> McpResult<Box<dyn Transport>> {
        Ok(match self {
            Endpoint::Child(spec) => Box::new(ChildTransport::open(spec, policy.clone())?),
            Endpoint::Http { url, token } => {
                Box::new(HttpTransport::new(url).with_token(token.clone()))
            }
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Child(spec) => {
                f.write_str(&spec.command)?;
                for arg in &spec.args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            Endpoint::Http { url, .. } => f.write_str(url),
        }
    }
}
