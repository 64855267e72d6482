//! A tool-invocation protocol engine.
//!
//! Servers expose a registry of named tools over newline-delimited JSON-RPC
//! on stdio, or over HTTP with JSON or single-event SSE replies. Clients
//! launch or connect to a server, run the `initialize` handshake, and make
//! correlated, deadline-bounded `tools/call` requests.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod repl;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{resolve_readonly, ClientConfig, LaunchSpec, ServerConfig, StopPolicy};
pub use protocol::ProtocolHandler;
pub use session::{CallOutcome, ClientSession};
pub use tools::{builtin_registry, ToolRegistry};
pub use transport::{Endpoint, StdioTransport, Transport};
