//! Dispatch pipeline: validate -> gate -> invoke -> wrap.
//!
//! Each stage is a plain function so it can be exercised on its own. Only
//! [`wrap`] produces the wire result, and it always produces a success-shaped
//! one: tool failures are in-band.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;

use crate::types::{ToolCallResult, ToolError};

use super::gate::MutationGate;
use super::registry::ToolSpec;
use super::schema::{Arguments, SchemaValidator};

pub fn validate(
    spec: &ToolSpec,
    validator: &dyn SchemaValidator,
    arguments: Option<Value>,
) -> Result<Arguments, ToolError> {
    validator.validate(&spec.schema, arguments)
}

pub fn gate(spec: &ToolSpec, gate: &MutationGate) -> Result<(), ToolError> {
    gate.check(&spec.name, spec.mutating)
}

/// Run the handler. A panicking handler is reported like any other failure.
pub async fn invoke(spec: &ToolSpec, arguments: Arguments) -> Result<Value, ToolError> {
    match AssertUnwindSafe(spec.handler.call(arguments)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            tracing::error!(tool = %spec.name, %message, "tool handler panicked");
            Err(ToolError::Handler(message))
        }
    }
}

pub fn wrap(outcome: Result<Value, ToolError>) -> ToolCallResult {
    match outcome {
        Ok(value) => ToolCallResult::json(&value),
        Err(e) => ToolCallResult::in_band_error(e),
    }
}

/// The full pipeline for a tool that is known to exist.
pub async fn run(
    spec: &ToolSpec,
    validator: &dyn SchemaValidator,
    mutation_gate: &MutationGate,
    arguments: Option<Value>,
) -> ToolCallResult {
    let outcome = async {
        let args = validate(spec, validator, arguments)?;
        gate(spec, mutation_gate)?;
        invoke(spec, args).await
    }
    .await;

    if let Err(e) = &outcome {
        tracing::debug!(tool = %spec.name, error = %e, "tool call failed in-band");
    }
    wrap(outcome)
}
