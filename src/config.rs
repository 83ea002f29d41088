//! Agent configuration
//!
//! Loaded once at process start. Key rotation never rewrites this file; a
//! rotated secret is persisted separately (see `identity::FileSecretStore`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent id presented to the controller
    pub agent_id: String,
    /// Shared secret presented at connect time
    pub agent_key: String,
    /// Controller WebSocket endpoint
    pub server_url: String,
    /// Site-management CLI
    pub panel_cli: String,
    /// Interactive certificate tool
    pub cert_tool: String,
    /// Script run by the `system_update` command
    pub update_script: PathBuf,
    /// Working tree the agent updates itself from
    pub repo_dir: PathBuf,
    /// Upstream ref tracked by `update_agent`
    pub upstream: String,
    /// Where a rotated key is persisted
    pub secret_file: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-001".into(),
            agent_key: String::new(),
            server_url: "ws://127.0.0.1:8080/agent".into(),
            panel_cli: "/usr/local/bin/panelctl".into(),
            cert_tool: "/usr/local/bin/certmgr".into(),
            update_script: "/opt/warden/update.sh".into(),
            repo_dir: "/opt/warden".into(),
            upstream: "origin/main".into(),
            secret_file: "/opt/warden/agent.key".into(),
        }
    }
}

impl AgentConfig {
    /// Load from a JSON file, falling back to defaults when no file is
    /// given. Identity and endpoint may be overridden from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(value) = std::env::var("WARDEN_AGENT_ID") {
            config.agent_id = value;
        }
        if let Ok(value) = std::env::var("WARDEN_AGENT_KEY") {
            config.agent_key = value;
        }
        if let Ok(value) = std::env::var("WARDEN_SERVER_URL") {
            config.server_url = value;
        }

        Ok(config)
    }
}
