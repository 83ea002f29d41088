//! Command handlers for the controller's command kinds

mod rotation;
mod site;
mod ssl;
mod update;

pub use rotation::handle_key_rotation;
pub use site::{handle_create_site, handle_delete_site, handle_site_info};
pub use ssl::{handle_deploy_ssl, handle_redeploy_ssl, handle_turn_off_ssl};
pub use update::{handle_rollback_agent, handle_system_update, handle_update_agent};

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::connection::ChannelHandle;
use crate::identity::{SecretStore, SharedIdentity};
use crate::panel::{CertCli, PanelCli};
use crate::update::SelfUpdateManager;
use warden_shared::Outbound;

/// Context passed to command handlers
pub struct HandlerContext {
    pub channel: ChannelHandle,
    pub identity: SharedIdentity,
    pub secret_store: Arc<dyn SecretStore>,
    pub panel: PanelCli,
    pub cert: CertCli,
    pub updater: Arc<SelfUpdateManager>,
    pub update_script: PathBuf,
}

/// An unrecognized command kind: one error report, nothing else runs
pub async fn handle_unknown(ctx: &HandlerContext, kind: &str) -> Result<()> {
    warn!("unknown command type: {}", kind);
    ctx.channel
        .send(Outbound::report_error(format!(
            "unknown command type: {}",
            kind
        )))
        .await;
    Ok(())
}
