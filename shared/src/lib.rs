//! Warden Shared Protocol Types
//!
//! This crate provides the message vocabulary and codec for communication
//! between warden agents and the controller. All frames are JSON text; field
//! names are camelCase on the wire, `type` tags are snake_case.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing parameters for the control channel
pub mod timing {
    /// Heartbeat period - one status snapshot per interval
    pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;

    /// Fixed delay between reconnect attempts
    pub const RECONNECT_DELAY_MS: u64 = 5_000;
}

/// A command decoded from a controller frame.
///
/// `Unknown` carries any unrecognized `type` value through to the dispatcher,
/// which owns the resulting error report.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    CreateSite {
        domain: String,
        options: serde_json::Value,
    },
    DeleteSite {
        domain: String,
    },
    DeploySsl {
        domain: String,
    },
    RedeploySsl {
        domain: String,
    },
    TurnOffSsl {
        domain: String,
    },
    SiteInfo {
        domain: String,
    },
    KeyRotation {
        new_key: String,
    },
    UpdateAgent,
    RollbackAgent {
        commit_id: Option<String>,
    },
    SystemUpdate,
    Unknown {
        kind: String,
    },
}

impl InboundCommand {
    /// The wire `type` value this command was decoded from
    pub fn kind(&self) -> &str {
        match self {
            InboundCommand::CreateSite { .. } => "create_site",
            InboundCommand::DeleteSite { .. } => "delete_site",
            InboundCommand::DeploySsl { .. } => "deploy_ssl",
            InboundCommand::RedeploySsl { .. } => "redeploy_ssl",
            InboundCommand::TurnOffSsl { .. } => "turn_off_ssl",
            InboundCommand::SiteInfo { .. } => "site_info",
            InboundCommand::KeyRotation { .. } => "key_rotation",
            InboundCommand::UpdateAgent => "update_agent",
            InboundCommand::RollbackAgent { .. } => "rollback_agent",
            InboundCommand::SystemUpdate => "system_update",
            InboundCommand::Unknown { kind } => kind,
        }
    }

    /// The domain this command targets, if it targets one
    pub fn domain(&self) -> Option<&str> {
        match self {
            InboundCommand::CreateSite { domain, .. }
            | InboundCommand::DeleteSite { domain }
            | InboundCommand::DeploySsl { domain }
            | InboundCommand::RedeploySsl { domain }
            | InboundCommand::TurnOffSsl { domain }
            | InboundCommand::SiteInfo { domain } => Some(domain),
            _ => None,
        }
    }
}

/// Site operations as named in outbound reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteOperationKind {
    Create,
    Delete,
    DeploySsl,
    RedeploySsl,
    TurnOffSsl,
}

/// Execution phase carried by operation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Starting,
    Running,
    SslRedeploying,
    Completed,
    Failed,
}

/// TLS details reported by `site_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SslInfo {
    pub enabled: bool,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub expiry: Option<String>,
}

/// Outbound payload vocabulary.
///
/// Every payload is serialized with its `type` tag; the `Envelope` wrapper
/// adds the per-frame `agentId` and `timestamp` fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    AgentConnected {
        version: String,
    },
    ClearCommandState,
    StatusUpdate {
        status: serde_json::Value,
    },
    SiteOperation {
        operation: SiteOperationKind,
        status: OperationPhase,
        domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SiteInfoResponse {
        domain: String,
        ssl: SslInfo,
    },
    #[serde(rename_all = "camelCase")]
    UpdateOperation {
        operation: String,
        status: OperationPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        git_version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RollbackOperation {
        operation: String,
        status: OperationPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        git_version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Status {
        operation: String,
        status: OperationPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentUpdated {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        original_message: Option<String>,
    },
}

/// Builder helpers for the report shapes handlers emit repeatedly
impl Outbound {
    /// A `site_operation` report at the `starting` phase
    pub fn site_starting(operation: SiteOperationKind, domain: impl Into<String>) -> Self {
        Outbound::SiteOperation {
            operation,
            status: OperationPhase::Starting,
            domain: domain.into(),
            output: None,
            error: None,
        }
    }

    /// A `site_operation` report at the `completed` phase with captured output
    pub fn site_completed(
        operation: SiteOperationKind,
        domain: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Outbound::SiteOperation {
            operation,
            status: OperationPhase::Completed,
            domain: domain.into(),
            output: Some(output.into()),
            error: None,
        }
    }

    /// A `site_operation` report at the `failed` phase
    pub fn site_failed(
        operation: SiteOperationKind,
        domain: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Outbound::SiteOperation {
            operation,
            status: OperationPhase::Failed,
            domain: domain.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    /// An `error` report with no domain scope
    pub fn report_error(error: impl Into<String>) -> Self {
        Outbound::Error {
            error: error.into(),
            domain: None,
            original_message: None,
        }
    }

    /// An `error` report scoped to a domain
    pub fn domain_error(domain: impl Into<String>, error: impl Into<String>) -> Self {
        Outbound::Error {
            error: error.into(),
            domain: Some(domain.into()),
            original_message: None,
        }
    }

    /// An `error` report for a frame that failed to decode
    pub fn decode_error(raw: impl Into<String>, error: impl Into<String>) -> Self {
        Outbound::Error {
            error: error.into(),
            domain: None,
            original_message: Some(raw.into()),
        }
    }
}

/// A complete outbound frame: payload plus per-frame identity fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Outbound,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub timestamp: u64,
}

impl Envelope {
    /// Wrap a payload with the sending agent's id and the current time
    pub fn new(agent_id: impl Into<String>, payload: Outbound) -> Self {
        Self {
            payload,
            agent_id: agent_id.into(),
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_identity_fields() {
        let envelope = Envelope::new("agent-7", Outbound::ClearCommandState);
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&envelope).unwrap()).unwrap();

        assert_eq!(json["type"], "clear_command_state");
        assert_eq!(json["agentId"], "agent-7");
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_site_operation_wire_shape() {
        let report = Outbound::site_completed(SiteOperationKind::Create, "example.com", "done");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["type"], "site_operation");
        assert_eq!(json["operation"], "create");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["domain"], "example.com");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_update_operation_uses_camel_case_fields() {
        let report = Outbound::UpdateOperation {
            operation: "update_agent".into(),
            status: OperationPhase::Completed,
            git_version: Some("abc123".into()),
            output: None,
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["type"], "update_operation");
        assert_eq!(json["gitVersion"], "abc123");
        assert!(json.get("git_version").is_none());
    }

    #[test]
    fn test_decode_error_echoes_original_message() {
        let report = Outbound::decode_error("not json", "expected value");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["originalMessage"], "not json");
    }

    #[test]
    fn test_command_kind_and_domain() {
        let cmd = InboundCommand::DeploySsl {
            domain: "x.test".into(),
        };
        assert_eq!(cmd.kind(), "deploy_ssl");
        assert_eq!(cmd.domain(), Some("x.test"));

        let cmd = InboundCommand::UpdateAgent;
        assert_eq!(cmd.kind(), "update_agent");
        assert_eq!(cmd.domain(), None);
    }
}
