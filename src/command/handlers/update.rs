//! Self-update command handlers (update, rollback, system update)

use anyhow::Result;
use std::os::unix::fs::PermissionsExt;
use tracing::{info, warn};

use super::HandlerContext;
use crate::process::{ProcessEvent, ProcessSession};
use crate::update::UpdateOutcome;
use warden_shared::{OperationPhase, Outbound};

fn update_report(status: OperationPhase) -> Outbound {
    Outbound::UpdateOperation {
        operation: "update_agent".into(),
        status,
        git_version: None,
        output: None,
        error: None,
    }
}

fn rollback_report(status: OperationPhase) -> Outbound {
    Outbound::RollbackOperation {
        operation: "rollback_agent".into(),
        status,
        git_version: None,
        output: None,
        error: None,
    }
}

/// Handle `update_agent`: advance to the tracked upstream and restart if the
/// tree moved. The completion reports are flushed to the socket before the
/// restart kills this process.
pub async fn handle_update_agent(ctx: &HandlerContext) -> Result<()> {
    ctx.channel.send(update_report(OperationPhase::Starting)).await;

    match ctx.updater.update().await {
        Ok(UpdateOutcome::AlreadyCurrent { version }) => {
            info!("agent already up to date at {}", version);
            ctx.channel
                .send(Outbound::UpdateOperation {
                    operation: "update_agent".into(),
                    status: OperationPhase::Completed,
                    git_version: Some(version),
                    output: Some("already up to date".into()),
                    error: None,
                })
                .await;
            ctx.channel
                .send(Outbound::AgentUpdated {
                    success: true,
                    version: None,
                    message: Some("already up to date".into()),
                })
                .await;
        }
        Ok(UpdateOutcome::Updated { version, log }) => {
            info!("agent updated to {}", version);
            ctx.channel
                .send(Outbound::UpdateOperation {
                    operation: "update_agent".into(),
                    status: OperationPhase::Completed,
                    git_version: Some(version.clone()),
                    output: Some(log),
                    error: None,
                })
                .await;
            ctx.channel
                .send(Outbound::AgentUpdated {
                    success: true,
                    version: Some(version),
                    message: None,
                })
                .await;
            ctx.channel.flush().await;
            ctx.updater.request_restart().await;
        }
        Err(e) => {
            ctx.channel
                .send(Outbound::UpdateOperation {
                    operation: "update_agent".into(),
                    status: OperationPhase::Failed,
                    git_version: None,
                    output: None,
                    error: Some(format!("{:#}", e)),
                })
                .await;
        }
    }
    Ok(())
}

/// Handle `rollback_agent`: a missing commit id fails fast with no fetch
pub async fn handle_rollback_agent(ctx: &HandlerContext, commit_id: Option<&str>) -> Result<()> {
    let Some(commit_id) = commit_id else {
        warn!("rollback requested without a commit id");
        ctx.channel
            .send(Outbound::RollbackOperation {
                operation: "rollback_agent".into(),
                status: OperationPhase::Failed,
                git_version: None,
                output: None,
                error: Some("rollback_agent requires a commitId".into()),
            })
            .await;
        return Ok(());
    };

    ctx.channel.send(rollback_report(OperationPhase::Starting)).await;

    match ctx.updater.rollback(commit_id).await {
        Ok(outcome) => {
            info!("agent rolled back to {}", outcome.version());
            ctx.channel
                .send(Outbound::RollbackOperation {
                    operation: "rollback_agent".into(),
                    status: OperationPhase::Completed,
                    git_version: Some(outcome.version().to_string()),
                    output: None,
                    error: None,
                })
                .await;
            ctx.channel.flush().await;
            ctx.updater.request_restart().await;
        }
        Err(e) => {
            ctx.channel
                .send(Outbound::RollbackOperation {
                    operation: "rollback_agent".into(),
                    status: OperationPhase::Failed,
                    git_version: None,
                    output: None,
                    error: Some(format!("{:#}", e)),
                })
                .await;
        }
    }
    Ok(())
}

fn system_report(status: OperationPhase, output: Option<String>, error: Option<String>) -> Outbound {
    Outbound::Status {
        operation: "system_update".into(),
        status,
        output,
        error,
    }
}

/// Handle `system_update`: run the configured update script, streaming every
/// output chunk back to the controller as it arrives
pub async fn handle_system_update(ctx: &HandlerContext) -> Result<()> {
    let script = &ctx.update_script;

    let metadata = match tokio::fs::metadata(script).await {
        Ok(metadata) => metadata,
        Err(e) => {
            ctx.channel
                .send(system_report(
                    OperationPhase::Failed,
                    None,
                    Some(format!("update script {}: {}", script.display(), e)),
                ))
                .await;
            return Ok(());
        }
    };
    if metadata.permissions().mode() & 0o111 == 0 {
        ctx.channel
            .send(system_report(
                OperationPhase::Failed,
                None,
                Some(format!(
                    "update script {} is not executable",
                    script.display()
                )),
            ))
            .await;
        return Ok(());
    }

    ctx.channel
        .send(system_report(OperationPhase::Starting, None, None))
        .await;

    let mut session = match ProcessSession::spawn(script, &[]) {
        Ok(session) => session,
        Err(e) => {
            ctx.channel
                .send(system_report(
                    OperationPhase::Failed,
                    None,
                    Some(format!("system_update failed to start: {}", e)),
                ))
                .await;
            return Ok(());
        }
    };

    while let Some(event) = session.recv().await {
        match event {
            ProcessEvent::Stdout(chunk) | ProcessEvent::Stderr(chunk) => {
                ctx.channel
                    .send(system_report(OperationPhase::Running, Some(chunk), None))
                    .await;
            }
            ProcessEvent::Exited(status) => {
                let report = if status.success() {
                    system_report(OperationPhase::Completed, None, None)
                } else {
                    system_report(
                        OperationPhase::Failed,
                        None,
                        Some(format!(
                            "update script exited with code {}",
                            status.code().unwrap_or(-1)
                        )),
                    )
                };
                ctx.channel.send(report).await;
                return Ok(());
            }
        }
    }

    ctx.channel
        .send(system_report(
            OperationPhase::Failed,
            None,
            Some("update script terminated without an exit status".into()),
        ))
        .await;
    Ok(())
}
