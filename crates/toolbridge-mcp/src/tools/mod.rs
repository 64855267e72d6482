//! Tool registry, dispatch pipeline, and the built-in tool set.

pub mod echo;
pub mod gate;
pub mod handler;
pub mod objects;
pub mod pipeline;
pub mod registry;
pub mod schema;

pub use gate::MutationGate;
pub use handler::{tool_fn, ToolHandler};
pub use objects::ObjectStore;
pub use registry::{ToolRegistry, ToolRegistryBuilder, ToolSpec};
pub use schema::{Arguments, DefaultValidator, InputSchema, PropertyType, SchemaValidator};

use crate::types::McpResult;

/// The tools served by `toolbridge-mcp serve`: `echo` plus the object store.
pub fn builtin_registry() -> McpResult<ToolRegistry> {
    ToolRegistry::builder()
        .register(echo::spec())
        .register_all(objects::specs(ObjectStore::shared()))
        .build()
}
