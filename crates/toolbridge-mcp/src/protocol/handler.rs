//! Main request dispatcher: routes incoming envelopes to method handlers.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::tools::ToolRegistry;
use crate::types::*;

use super::negotiation::NegotiatedCapabilities;
use super::validator::validate_request;

/// Server-side protocol handler shared by every transport.
#[derive(Clone)]
pub struct ProtocolHandler {
    registry: Arc<ToolRegistry>,
    config: ServerConfig,
    capabilities: Arc<Mutex<NegotiatedCapabilities>>,
}

impl ProtocolHandler {
    pub fn new(registry: Arc<ToolRegistry>, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            capabilities: Arc::new(Mutex::new(NegotiatedCapabilities::default())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle one envelope. `None` means nothing goes back on the wire.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif).await;
                None
            }
            _ => {
                tracing::warn!("Received unexpected message type from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        if let Err(e) = validate_request(&request) {
            return render(e.to_json_rpc_error(request.id));
        }

        let id = request.id.clone();
        tracing::debug!(method = %request.method, id = %id, "handling request");
        match self.dispatch_request(&request).await {
            Ok(value) => render(JsonRpcResponse::new(id, value)),
            Err(e) => {
                tracing::debug!(method = %request.method, error = %e, "request failed");
                render(e.to_json_rpc_error(id))
            }
        }
    }

    async fn dispatch_request(&self, request: &JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.params.clone()).await,
            methods::TOOLS_LIST => self.handle_tools_list().await,
            methods::TOOLS_CALL => self.handle_tools_call(request.params.clone()).await,
            methods::PING => Ok(Value::Object(serde_json::Map::new())),
            _ => Err(McpError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED | "initialized" => {
                let mut caps = self.capabilities.lock().await;
                caps.mark_initialized();
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                tracing::info!("Received cancellation notification");
            }
            _ => {
                tracing::debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let init_params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Initialize params required".to_string()))?;

        let mut caps = self.capabilities.lock().await;
        let result = caps.negotiate(init_params, &self.config);

        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    async fn handle_tools_list(&self) -> McpResult<Value> {
        let result = ToolListResult {
            tools: self.registry.list(),
            next_cursor: None,
        };
        serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
    }

    /// Unknown tools get a success reply carrying a bare `{"error": ..}`
    /// result, not a JSON-RPC error.
    async fn handle_tools_call(&self, params: Option<Value>) -> McpResult<Value> {
        let call_params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::InvalidParams(e.to_string()))?
            .ok_or_else(|| McpError::InvalidParams("Tool call params required".to_string()))?;

        let outcome = self
            .registry
            .dispatch(&call_params.name, call_params.arguments, &self.config)
            .await;

        match outcome {
            Ok(result) => {
                serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
            }
            Err(e @ McpError::ToolNotFound(_)) => {
                let rejection = ToolRejection {
                    error: e.to_string(),
                };
                serde_json::to_value(rejection).map_err(|e| McpError::InternalError(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a client has sent `notifications/initialized`.
    pub async fn client_initialized(&self) -> bool {
        self.capabilities.lock().await.initialized
    }
}

fn render(envelope: impl serde::Serialize) -> Value {
    serde_json::to_value(envelope).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin_registry;
    use serde_json::json;

    fn handler() -> ProtocolHandler {
        ProtocolHandler::new(Arc::new(builtin_registry().unwrap()), ServerConfig::default())
    }

    async fn request(handler: &ProtocolHandler, body: Value) -> Value {
        let msg: JsonRpcMessage = serde_json::from_value(body).unwrap();
        handler.handle_message(msg).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_reports_tools_capability() {
        let h = handler();
        let resp = request(
            &h,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }}),
        )
        .await;
        assert_eq!(resp["result"]["protocolVersion"], MCP_VERSION);
        assert!(resp["result"]["capabilities"]["tools"].is_object());
        assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn test_initialized_notification_has_no_reply() {
        let h = handler();
        let msg: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(h.handle_message(msg).await.is_none());
        assert!(h.client_initialized().await);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_bare_error_result() {
        let h = handler();
        let resp = request(
            &h,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "unknownTool", "arguments": {}}}),
        )
        .await;
        assert!(resp.get("error").is_none());
        assert_eq!(resp["result"], json!({"error": "Unknown tool: unknownTool"}));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let h = handler();
        let resp = request(&h, json!({"jsonrpc": "2.0", "id": 5, "method": "resources/list"})).await;
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_missing_call_params() {
        let h = handler();
        let resp = request(&h, json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call"})).await;
        assert_eq!(resp["error"]["code"], -32602);
    }
}
