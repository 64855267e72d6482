//! Tool registration and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ServerConfig;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::gate::MutationGate;
use super::handler::ToolHandler;
use super::pipeline;
use super::schema::{DefaultValidator, InputSchema, SchemaValidator};

/// One registered tool: descriptor plus handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: InputSchema,
    /// Subject to the readonly gate.
    pub mutating: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        name: &str,
        description: &str,
        schema: InputSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema,
            mutating: false,
            handler,
        }
    }

    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json(),
        }
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("mutating", &self.mutating)
            .finish_non_exhaustive()
    }
}

/// Collects tools at startup. Name collisions fail [`ToolRegistryBuilder::build`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<ToolSpec>,
    validator: Option<Arc<dyn SchemaValidator>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, spec: ToolSpec) -> Self {
        self.tools.push(spec);
        self
    }

    pub fn register_all(mut self, specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        self.tools.extend(specs);
        self
    }

    /// Replace the default schema validator.
    pub fn validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn build(self) -> McpResult<ToolRegistry> {
        let mut index = HashMap::with_capacity(self.tools.len());
        for (position, spec) in self.tools.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(McpError::Config(format!(
                    "tool '{}' registered more than once",
                    spec.name
                )));
            }
        }

        tracing::debug!(tools = self.tools.len(), "tool registry built");
        Ok(ToolRegistry {
            tools: self.tools,
            index,
            validator: self.validator.unwrap_or_else(|| Arc::new(DefaultValidator)),
        })
    }
}

/// Immutable name -> tool table.
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
    index: HashMap<String, usize>,
    validator: Arc<dyn SchemaValidator>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolSpec::definition).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Route a call.
    ///
    /// An unknown name is the only `Err`; everything that happens once a
    /// tool is found comes back as a success-shaped result.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<Value>,
        config: &ServerConfig,
    ) -> McpResult<ToolCallResult> {
        let Some(spec) = self.get(name) else {
            tracing::warn!(tool = name, "call to unknown tool");
            return Err(McpError::ToolNotFound(name.to_string()));
        };

        tracing::debug!(tool = name, "dispatching tool call");
        let gate = MutationGate::new(config.clone());
        Ok(pipeline::run(spec, self.validator.as_ref(), &gate, arguments).await)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handler::tool_fn;
    use crate::tools::schema::PropertyType;
    use serde_json::json;

    fn noop(name: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            "does nothing",
            InputSchema::new(),
            tool_fn(|_| async move { Ok(json!({})) }),
        )
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ToolRegistry::builder()
            .register(noop("a"))
            .register(noop("b"))
            .register(noop("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[test]
    fn test_list_in_registration_order() {
        let registry = ToolRegistry::builder()
            .register(noop("zeta"))
            .register(noop("alpha"))
            .build()
            .unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_top_level() {
        let empty = ToolRegistry::builder().build().unwrap();
        let err = empty
            .dispatch("unknownTool", Some(json!({})), &ServerConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: unknownTool");
    }

    #[test]
    fn test_definition_carries_schema() {
        let spec = noop("echo");
        let spec = ToolSpec {
            schema: InputSchema::new().required("message", PropertyType::String, ""),
            ..spec
        };
        let def = spec.definition();
        assert_eq!(def.input_schema["properties"]["message"]["type"], "string");
    }
}
