//! Readonly policy for state-changing tools.

use crate::config::ServerConfig;
use crate::types::ToolError;

/// Blocks mutating tools while the server is readonly.
///
/// Holds the config, not a snapshot of the flag: every check re-reads it.
#[derive(Debug, Clone)]
pub struct MutationGate {
    config: ServerConfig,
}

impl MutationGate {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, tool: &str, mutating: bool) -> Result<(), ToolError> {
        if mutating && self.config.is_readonly() {
            tracing::info!(tool, "mutation blocked in readonly mode");
            return Err(ToolError::ReadOnlyViolation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_read_per_check() {
        let config = ServerConfig::default();
        let gate = MutationGate::new(config.clone());

        assert!(gate.check("putObject", true).is_ok());
        config.set_readonly(true);
        assert_eq!(gate.check("putObject", true), Err(ToolError::ReadOnlyViolation));
        assert!(gate.check("getObject", false).is_ok());
        config.set_readonly(false);
        assert!(gate.check("putObject", true).is_ok());
    }
}
