//! Configuration loading and resolution.

pub mod catalog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{InitializeParams, InitializeResult, SERVER_NAME, SERVER_VERSION};

pub use catalog::{LaunchSpec, ServerCatalog};

/// Environment variable holding the initial readonly flag.
pub const READONLY_ENV: &str = "TOOLBRIDGE_READONLY";

/// Environment variable holding the HTTP access token.
pub const TOKEN_ENV: &str = "TOOLBRIDGE_TOKEN";

/// Handshake deadline.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Tool invocation deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait between graceful termination and force-kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Interpret a flag value the way shells usually spell "on".
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Resolve the initial readonly flag: explicit CLI flag, then environment.
pub fn resolve_readonly(explicit: bool) -> bool {
    if explicit {
        return true;
    }
    std::env::var(READONLY_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

/// Server-side settings shared by every connection.
///
/// The readonly flag is held behind an atomic so it can be flipped at
/// runtime; the mutation gate reads it on every call.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
    readonly: Arc<AtomicBool>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
            instructions: Some(
                "Toolbridge exposes cloud-resource operations as tools. \
                 Use tools/list to discover them and tools/call to invoke them. \
                 Tool failures are reported in-band as an `error` key inside the content."
                    .to_string(),
            ),
            readonly: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ServerConfig {
    pub fn with_readonly(readonly: bool) -> Self {
        let config = Self::default();
        config.set_readonly(readonly);
        config
    }

    /// Current readonly flag. Not cached.
    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::SeqCst)
    }

    pub fn set_readonly(&self, readonly: bool) {
        let previous = self.readonly.swap(readonly, Ordering::SeqCst);
        if previous != readonly {
            tracing::info!(readonly, "readonly mode changed");
        }
    }

    pub fn initialize_result(&self) -> InitializeResult {
        InitializeResult::new(&self.name, &self.version, self.instructions.clone())
    }
}

/// Client-side settings for one connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_name: String,
    pub client_version: String,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    /// Send `notifications/initialized` once the handshake completes.
    pub send_initialized: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: format!("{SERVER_NAME}-client"),
            client_version: SERVER_VERSION.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            send_initialized: true,
        }
    }
}

impl ClientConfig {
    pub fn initialize_params(&self) -> InitializeParams {
        InitializeParams::new(&self.client_name, &self.client_version)
    }
}

/// Termination policy for child processes.
#[derive(Debug, Clone)]
pub struct StopPolicy {
    pub grace: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace: DEFAULT_STOP_GRACE,
        }
    }
}
