//! Connection handshake state machine.

use std::fmt;

use crate::types::{McpError, McpResult, RequestId};

/// Where a client connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Initializing,
    Ready,
    /// Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Drives `Unconnected -> Initializing -> Ready`, with `Closed` reachable
/// from anywhere.
#[derive(Debug)]
pub struct Handshake {
    state: SessionState,
    init_id: Option<u64>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unconnected,
            init_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record that `initialize` went out with `id`.
    pub fn begin(&mut self, id: u64) -> McpResult<()> {
        if self.state != SessionState::Unconnected {
            return Err(McpError::InvalidRequest(format!(
                "cannot initialize a session that is {}",
                self.state
            )));
        }
        self.state = SessionState::Initializing;
        self.init_id = Some(id);
        Ok(())
    }

    /// A successful reply arrived while initializing. Its id must match the
    /// initialize request; anything else closes the session.
    pub fn complete(&mut self, reply_id: &RequestId) -> McpResult<()> {
        let expected = match (self.state, self.init_id) {
            (SessionState::Initializing, Some(id)) => id,
            _ => {
                self.close();
                return Err(McpError::Protocol(format!(
                    "unexpected handshake reply while {}",
                    self.state
                )));
            }
        };

        if reply_id.as_u64() != Some(expected) {
            self.close();
            return Err(McpError::Protocol(format!(
                "handshake reply id {reply_id} does not match initialize id {expected}"
            )));
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            tracing::debug!(from = %self.state, "session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Fail fast unless the handshake has completed.
    pub fn ensure_ready(&self) -> McpResult<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            state => Err(McpError::NotInitialized {
                state: state.to_string(),
            }),
        }
    }
}
