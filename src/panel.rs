//! External panel CLI and certificate tool surfaces
//!
//! The agent drives two external programs with a fixed argument grammar:
//! the site-management CLI (non-interactive) and the certificate tool
//! (interactive, automated via prompt rules). This module owns that grammar
//! and the JSON shape of the site info query.

use anyhow::{Context, Result};
use serde::Deserialize;
use warden_shared::SslInfo;

/// Site-management CLI invocations
#[derive(Debug, Clone)]
pub struct PanelCli {
    pub program: String,
}

impl PanelCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn create_site_args(&self, domain: &str, options: &serde_json::Value) -> Vec<String> {
        vec![
            "site".into(),
            "create".into(),
            domain.into(),
            "--options".into(),
            options.to_string(),
        ]
    }

    pub fn delete_site_args(&self, domain: &str) -> Vec<String> {
        vec!["site".into(), "delete".into(), domain.into()]
    }

    pub fn site_info_args(&self, domain: &str) -> Vec<String> {
        vec!["site".into(), "info".into(), "--json".into(), domain.into()]
    }
}

/// Interactive certificate tool invocations
#[derive(Debug, Clone)]
pub struct CertCli {
    pub program: String,
}

impl CertCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn deploy_args(&self, domain: &str) -> Vec<String> {
        vec!["deploy".into(), "--domain".into(), domain.into()]
    }

    pub fn disable_args(&self, domain: &str) -> Vec<String> {
        vec!["disable".into(), "--domain".into(), domain.into()]
    }
}

/// `site info --json` response shape; fields beyond TLS are ignored
#[derive(Debug, Deserialize)]
struct SiteInfoPayload {
    #[serde(default)]
    ssl: Option<SslInfo>,
}

/// Extract the TLS details from a `site info --json` response
pub fn parse_site_info(raw: &str) -> Result<SslInfo> {
    let payload: SiteInfoPayload =
        serde_json::from_str(raw).context("invalid site info JSON")?;
    Ok(payload.ssl.unwrap_or(SslInfo {
        enabled: false,
        provider: None,
        expiry: None,
    }))
}
