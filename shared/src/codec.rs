//! JSON text-frame codec
//!
//! Every inbound frame is a single JSON object:
//! ```text
//! { "type": "<command kind>", ...kind-specific fields }
//! ```
//! Field names are camelCase on the wire. An unrecognized `type` is not a
//! decode fault; it decodes to [`InboundCommand::Unknown`] so the dispatcher
//! can report it by name.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::{Envelope, InboundCommand};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("invalid `{kind}` fields: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode error: {0}")]
    Encode(serde_json::Error),
}

#[derive(Deserialize)]
struct DomainFields {
    domain: String,
}

#[derive(Deserialize)]
struct CreateSiteFields {
    domain: String,
    #[serde(default)]
    options: serde_json::Value,
}

#[derive(Deserialize)]
struct KeyRotationFields {
    #[serde(rename = "newKey")]
    new_key: String,
}

#[derive(Deserialize)]
struct RollbackFields {
    // Absence is a handler-level failure, not a decode fault
    #[serde(rename = "commitId", default)]
    commit_id: Option<String>,
}

fn fields<T: DeserializeOwned>(kind: &str, value: &serde_json::Value) -> Result<T, CodecError> {
    serde_json::from_value(value.clone()).map_err(|source| CodecError::InvalidFields {
        kind: kind.to_string(),
        source,
    })
}

/// Decode one inbound text frame into a command
pub fn decode_inbound(raw: &str) -> Result<InboundCommand, CodecError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(CodecError::InvalidJson)?;

    let kind = value
        .as_object()
        .ok_or(CodecError::NotAnObject)?
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(CodecError::MissingType)?
        .to_string();

    let command = match kind.as_str() {
        "create_site" => {
            let f: CreateSiteFields = fields(&kind, &value)?;
            InboundCommand::CreateSite {
                domain: f.domain,
                options: f.options,
            }
        }
        "delete_site" => {
            let f: DomainFields = fields(&kind, &value)?;
            InboundCommand::DeleteSite { domain: f.domain }
        }
        "deploy_ssl" => {
            let f: DomainFields = fields(&kind, &value)?;
            InboundCommand::DeploySsl { domain: f.domain }
        }
        "redeploy_ssl" => {
            let f: DomainFields = fields(&kind, &value)?;
            InboundCommand::RedeploySsl { domain: f.domain }
        }
        "turn_off_ssl" => {
            let f: DomainFields = fields(&kind, &value)?;
            InboundCommand::TurnOffSsl { domain: f.domain }
        }
        "site_info" => {
            let f: DomainFields = fields(&kind, &value)?;
            InboundCommand::SiteInfo { domain: f.domain }
        }
        "key_rotation" => {
            let f: KeyRotationFields = fields(&kind, &value)?;
            InboundCommand::KeyRotation { new_key: f.new_key }
        }
        "update_agent" => InboundCommand::UpdateAgent,
        "rollback_agent" => {
            let f: RollbackFields = fields(&kind, &value)?;
            InboundCommand::RollbackAgent {
                commit_id: f.commit_id,
            }
        }
        "system_update" => InboundCommand::SystemUpdate,
        _ => InboundCommand::Unknown { kind },
    };

    Ok(command)
}

/// Encode an outbound envelope into a text frame
pub fn encode_outbound(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(CodecError::Encode)
}
