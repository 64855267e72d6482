//! Server-side JSON-RPC method routing.

pub mod handler;
pub mod negotiation;
pub mod validator;

pub use handler::ProtocolHandler;
