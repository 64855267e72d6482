//! Tool: echo. Returns the call's arguments unchanged.

use serde_json::Value;

use super::handler::tool_fn;
use super::registry::ToolSpec;
use super::schema::{InputSchema, PropertyType};

pub fn spec() -> ToolSpec {
    ToolSpec::new(
        "echo",
        "Echo the given arguments back as JSON",
        InputSchema::new().required("message", PropertyType::String, "Text to echo"),
        tool_fn(|args| async move { Ok(Value::Object(args)) }),
    )
}
