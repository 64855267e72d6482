//! Capability negotiation during initialization.

use crate::config::ServerConfig;
use crate::types::{ClientCapabilities, Implementation, InitializeParams, InitializeResult, MCP_VERSION};

/// What the server learned from the most recent client handshake.
#[derive(Debug, Clone, Default)]
pub struct NegotiatedCapabilities {
    pub client: ClientCapabilities,
    pub client_info: Option<Implementation>,
    pub initialized: bool,
}

impl NegotiatedCapabilities {
    /// Record the client's side and answer with ours. A protocol version
    /// mismatch is tolerated; the server's version is returned.
    pub fn negotiate(&mut self, params: InitializeParams, config: &ServerConfig) -> InitializeResult {
        if params.protocol_version != MCP_VERSION {
            tracing::warn!(
                "Client requested protocol version {}, server supports {}. Proceeding with server version.",
                params.protocol_version,
                MCP_VERSION
            );
        }

        tracing::info!(
            "Initialized with client: {} v{}",
            params.client_info.name,
            params.client_info.version
        );

        self.client = params.capabilities;
        self.client_info = Some(params.client_info);
        self.initialized = false;
        config.initialize_result()
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
        tracing::info!("Client handshake complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_is_tolerated() {
        let mut caps = NegotiatedCapabilities::default();
        let mut params = InitializeParams::new("old-client", "0.1");
        params.protocol_version = "2023-01-01".to_string();

        let result = caps.negotiate(params, &ServerConfig::default());
        assert_eq!(result.protocol_version, MCP_VERSION);
        assert_eq!(caps.client_info.unwrap().name, "old-client");
    }
}
