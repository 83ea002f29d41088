//! Key rotation handler

use anyhow::Result;
use tracing::info;

use super::HandlerContext;
use warden_shared::{OperationPhase, Outbound};

/// Handle `key_rotation`: persist the new secret and swap it in memory.
/// The rotated key is used on the next connect attempt; the live session
/// keeps its credentials.
pub async fn handle_key_rotation(ctx: &HandlerContext, new_key: &str) -> Result<()> {
    let report = match ctx.secret_store.persist(new_key).await {
        Ok(()) => {
            ctx.identity.write().await.shared_secret = new_key.to_string();
            info!("agent key rotated; applies on next reconnect");
            Outbound::Status {
                operation: "key_rotation".into(),
                status: OperationPhase::Completed,
                output: Some("key rotated".into()),
                error: None,
            }
        }
        Err(e) => Outbound::Status {
            operation: "key_rotation".into(),
            status: OperationPhase::Failed,
            output: None,
            error: Some(format!("failed to persist rotated key: {:#}", e)),
        },
    };
    ctx.channel.send(report).await;
    Ok(())
}
