//! The uniform tool handler interface.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::ToolError;

use super::schema::Arguments;

/// Server-side implementation of one tool.
///
/// Receives arguments already validated and coerced against the tool's
/// schema. Errors are reported in-band by the dispatcher.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, arguments: Arguments) -> Result<Value, ToolError> {
        (self.f)(arguments).await
    }
}

pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Deserialize validated arguments into a typed params struct.
pub fn parse_args<P: DeserializeOwned>(arguments: Arguments) -> Result<P, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
