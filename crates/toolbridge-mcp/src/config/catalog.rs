//! Catalog of launchable servers (`{"servers": {name: {command, args, env}}}`).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{McpError, McpResult};

/// How to launch one server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse `KEY=VALUE` pairs as given on the command line.
    pub fn with_env_pairs(mut self, pairs: &[String]) -> McpResult<Self> {
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| McpError::Config(format!("expected KEY=VALUE, got '{pair}'")))?;
            self.env.insert(key.to_string(), value.to_string());
        }
        Ok(self)
    }
}

/// Named servers, ordered by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCatalog {
    #[serde(default)]
    pub servers: BTreeMap<String, LaunchSpec>,
}

impl ServerCatalog {
    pub fn load(path: &Path) -> McpResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McpError::Config(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> McpResult<Self> {
        let catalog: Self = serde_json::from_str(raw)
            .map_err(|e| McpError::Config(format!("invalid catalog: {e}")))?;
        if catalog.servers.is_empty() {
            return Err(McpError::Config("catalog names no servers".to_string()));
        }
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&LaunchSpec> {
        self.servers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_from_json() {
        let catalog = ServerCatalog::from_json(
            r#"{"servers": {
                "s3": {"command": "s3-server", "env": {"AWS_REGION": "us-east-1"}},
                "kendra": {"command": "python", "args": ["-m", "kendra"]}
            }}"#,
        )
        .unwrap();
        let names: Vec<_> = catalog.servers.keys().cloned().collect();
        assert_eq!(names, vec!["kendra", "s3"]);
        assert_eq!(catalog.get("kendra").unwrap().args, vec!["-m", "kendra"]);
        assert_eq!(catalog.get("s3").unwrap().env["AWS_REGION"], "us-east-1");
    }

    #[test]
    fn test_catalog_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"{"servers": {"local": {"command": "toolbridge-mcp", "args": ["serve"]}}}"#)
            .unwrap();

        let catalog = ServerCatalog::load(&path).unwrap();
        assert_eq!(catalog.get("local").unwrap().args, vec!["serve"]);

        let err = ServerCatalog::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(ServerCatalog::from_json(r#"{"servers": {}}"#).is_err());
        assert!(ServerCatalog::from_json("not json").is_err());
    }

    #[test]
    fn test_env_pairs() {
        let spec = LaunchSpec::new("srv")
            .with_env_pairs(&["A=1".to_string(), "B=x=y".to_string()])
            .unwrap();
        assert_eq!(spec.env["A"], "1");
        assert_eq!(spec.env["B"], "x=y");
        assert!(LaunchSpec::new("srv")
            .with_env_pairs(&["broken".to_string()])
            .is_err());
    }
}
