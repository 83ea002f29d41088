//! Certificate command handlers (deploy, redeploy, turn off)
//!
//! The certificate tool is interactive; its menu prompts are answered by
//! the automation engine's prompt rules.

use anyhow::Result;
use tracing::{info, warn};

use super::HandlerContext;
use crate::process::{self, PromptRule};
use warden_shared::{OperationPhase, Outbound, SiteOperationKind};

/// Reinstall the existing certificate when the tool offers its menu
const DEPLOY_RULES: &[PromptRule] = &[PromptRule {
    needles: &[
        "Please select an option from below",
        "1: Reinstall existing certificate",
        "Type the appropriate number",
    ],
    response: "1",
}];

/// Force a renewal on redeploy
const REDEPLOY_RULES: &[PromptRule] = &[PromptRule {
    needles: &[
        "Please select an option from below",
        "Type the appropriate number",
    ],
    response: "2",
}];

/// Handle `deploy_ssl`
pub async fn handle_deploy_ssl(ctx: &HandlerContext, domain: &str) -> Result<()> {
    info!("deploying certificate for {}", domain);
    ctx.channel
        .send(Outbound::site_starting(SiteOperationKind::DeploySsl, domain))
        .await;

    let args = ctx.cert.deploy_args(domain);
    let report =
        match process::run_interactive("deploy_ssl", &ctx.cert.program, &args, DEPLOY_RULES).await {
            Ok(output) => Outbound::site_completed(SiteOperationKind::DeploySsl, domain, output),
            Err(e) => Outbound::site_failed(SiteOperationKind::DeploySsl, domain, e.to_string()),
        };
    ctx.channel.send(report).await;
    Ok(())
}

/// Handle `turn_off_ssl`: no prompts, pure streaming capture
pub async fn handle_turn_off_ssl(ctx: &HandlerContext, domain: &str) -> Result<()> {
    info!("disabling certificate for {}", domain);
    ctx.channel
        .send(Outbound::site_starting(SiteOperationKind::TurnOffSsl, domain))
        .await;

    let args = ctx.cert.disable_args(domain);
    let report =
        match process::run_interactive("turn_off_ssl", &ctx.cert.program, &args, &[]).await {
            Ok(output) => Outbound::site_completed(SiteOperationKind::TurnOffSsl, domain, output),
            Err(e) => Outbound::site_failed(SiteOperationKind::TurnOffSsl, domain, e.to_string()),
        };
    ctx.channel.send(report).await;
    Ok(())
}

/// Handle `redeploy_ssl`: turn the certificate off first, then deploy with a
/// forced renewal. Only the deploy outcome is reported to the controller.
pub async fn handle_redeploy_ssl(ctx: &HandlerContext, domain: &str) -> Result<()> {
    info!("redeploying certificate for {}", domain);
    ctx.channel
        .send(Outbound::site_starting(
            SiteOperationKind::RedeploySsl,
            domain,
        ))
        .await;

    // The certificate may not have been active; a failed turn-off is only a
    // warning and the redeploy proceeds regardless
    let disable_args = ctx.cert.disable_args(domain);
    if let Err(e) =
        process::run_interactive("turn_off_ssl", &ctx.cert.program, &disable_args, &[]).await
    {
        warn!("turn-off before redeploy failed: {:#}", e);
    }

    ctx.channel
        .send(Outbound::SiteOperation {
            operation: SiteOperationKind::RedeploySsl,
            status: OperationPhase::SslRedeploying,
            domain: domain.to_string(),
            output: None,
            error: None,
        })
        .await;

    let deploy_args = ctx.cert.deploy_args(domain);
    let report = match process::run_interactive(
        "redeploy_ssl",
        &ctx.cert.program,
        &deploy_args,
        REDEPLOY_RULES,
    )
    .await
    {
        Ok(output) => Outbound::site_completed(SiteOperationKind::RedeploySsl, domain, output),
        Err(e) => Outbound::site_failed(SiteOperationKind::RedeploySsl, domain, e.to_string()),
    };
    ctx.channel.send(report).await;
    Ok(())
}
