//! Request parameter types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names understood by both ends.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl ToolCallParams {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments: Some(arguments),
        }
    }
}
