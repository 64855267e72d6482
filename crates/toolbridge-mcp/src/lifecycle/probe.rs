//! Liveness probes and single-shot invocations against launchable servers.
//!
//! Nothing here pools or reuses a process: every probe and every call gets a
//! fresh child that is torn down before the function returns.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::{ClientConfig, LaunchSpec, ServerCatalog, StopPolicy};
use crate::session::{CallOutcome, ClientSession};
use crate::transport::{ChildTransport, Transport};
use crate::types::{Implementation, InitializeResult, McpResult, ToolDefinition};

/// Up/down status of one server, from a handshake-only probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<Implementation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Spawn `spec`, run the handshake under the handshake timeout, and stop it.
///
/// The probe never sends `notifications/initialized`, so the server never
/// sees a committed session. Failures are reported, not returned.
pub async fn probe(spec: &LaunchSpec, config: &ClientConfig, policy: &StopPolicy) -> ProbeReport {
    let started = Instant::now();
    let mut config = config.clone();
    config.send_initialized = false;

    let outcome = handshake_only(spec, config, policy).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            tracing::info!(
                command = %spec.command,
                server = %result.server_info.name,
                elapsed_ms,
                "probe up"
            );
            ProbeReport {
                up: true,
                server: Some(result.server_info),
                error: None,
                elapsed_ms,
            }
        }
        Err(e) => {
            tracing::warn!(command = %spec.command, error = %e, elapsed_ms, "probe down");
            ProbeReport {
                up: false,
                server: None,
                error: Some(e.to_string()),
                elapsed_ms,
            }
        }
    }
}

async fn handshake_only(
    spec: &LaunchSpec,
    config: ClientConfig,
    policy: &StopPolicy,
) -> McpResult<InitializeResult> {
    let transport = ChildTransport::open(spec, policy.clone())?;
    let mut session = ClientSession::new(transport, config);
    let handshake = session.initialize().await;
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "teardown after probe failed");
    }
    handshake
}

/// Probe every server in the catalog concurrently, in catalog order.
pub async fn probe_all(
    catalog: &ServerCatalog,
    config: &ClientConfig,
    policy: &StopPolicy,
) -> Vec<(String, ProbeReport)> {
    let probes = catalog.servers.iter().map(|(name, spec)| async move {
        (name.clone(), probe(spec, config, policy).await)
    });
    join_all(probes).await
}

/// Handshake, one `tools/call`, teardown, over an already-open transport.
///
/// The transport is closed whatever happens. A teardown failure after the
/// call completed is logged and does not mask the outcome.
pub async fn call_over<T: Transport>(
    transport: T,
    tool: &str,
    arguments: Value,
    config: &ClientConfig,
) -> McpResult<CallOutcome> {
    let mut session = ClientSession::new(transport, config.clone());
    let outcome = match session.initialize().await {
        Ok(_) => session.call_tool(tool, arguments).await,
        Err(e) => Err(e),
    };
    if let Err(e) = session.close().await {
        tracing::warn!(tool, error = %e, "teardown after call failed");
    }
    outcome
}

/// One full cycle against a fresh child: spawn, handshake, call, stop.
pub async fn call_once(
    spec: &LaunchSpec,
    tool: &str,
    arguments: Value,
    config: &ClientConfig,
    policy: &StopPolicy,
) -> McpResult<CallOutcome> {
    let transport = ChildTransport::open(spec, policy.clone())?;
    call_over(transport, tool, arguments, config).await
}

/// Handshake and `tools/list` over an already-open transport, then close.
pub async fn list_over<T: Transport>(
    transport: T,
    config: &ClientConfig,
) -> McpResult<Vec<ToolDefinition>> {
    let mut session = ClientSession::new(transport, config.clone());
    let tools = match session.initialize().await {
        Ok(_) => session.list_tools().await,
        Err(e) => Err(e),
    };
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "teardown after discovery failed");
    }
    tools
}

pub async fn list_once(
    spec: &LaunchSpec,
    config: &ClientConfig,
    policy: &StopPolicy,
) -> McpResult<Vec<ToolDefinition>> {
    let transport = ChildTransport::open(spec, policy.clone())?;
    list_over(transport, config).await
}

/// Build a tool → server routing table from each server's `tools/list`.
///
/// Servers that fail discovery are skipped. When two servers expose the
/// same tool name, the first in catalog order keeps it.
pub async fn discover_routes(
    catalog: &ServerCatalog,
    config: &ClientConfig,
    policy: &StopPolicy,
) -> BTreeMap<String, String> {
    let mut routes = BTreeMap::new();

    for (server, spec) in &catalog.servers {
        let tools = match list_once(spec, config, policy).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "skipping server in route discovery");
                continue;
            }
        };
        for tool in tools {
            match routes.get(&tool.name) {
                Some(owner) => {
                    tracing::warn!(tool = %tool.name, owner = %owner, shadowed = %server, "duplicate tool name");
                }
                None => {
                    routes.insert(tool.name, server.clone());
                }
            }
        }
    }

    routes
}
