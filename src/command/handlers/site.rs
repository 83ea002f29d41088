//! Site command handlers (create, delete, info)

use anyhow::Result;
use tracing::info;

use super::HandlerContext;
use crate::panel::parse_site_info;
use crate::process;
use warden_shared::{Outbound, SiteOperationKind};

/// Handle `create_site`
pub async fn handle_create_site(
    ctx: &HandlerContext,
    domain: &str,
    options: &serde_json::Value,
) -> Result<()> {
    info!("creating site {}", domain);
    ctx.channel
        .send(Outbound::site_starting(SiteOperationKind::Create, domain))
        .await;

    let args = ctx.panel.create_site_args(domain, options);
    let report = match process::run_capture("create_site", &ctx.panel.program, &args).await {
        Ok(output) => Outbound::site_completed(SiteOperationKind::Create, domain, output),
        Err(e) => Outbound::site_failed(SiteOperationKind::Create, domain, e.to_string()),
    };
    ctx.channel.send(report).await;
    Ok(())
}

/// Handle `delete_site`
pub async fn handle_delete_site(ctx: &HandlerContext, domain: &str) -> Result<()> {
    info!("deleting site {}", domain);
    ctx.channel
        .send(Outbound::site_starting(SiteOperationKind::Delete, domain))
        .await;

    let args = ctx.panel.delete_site_args(domain);
    let report = match process::run_capture("delete_site", &ctx.panel.program, &args).await {
        Ok(output) => Outbound::site_completed(SiteOperationKind::Delete, domain, output),
        Err(e) => Outbound::site_failed(SiteOperationKind::Delete, domain, e.to_string()),
    };
    ctx.channel.send(report).await;
    Ok(())
}

/// Handle `site_info`: query and parse failures are domain-scoped error
/// reports, not site operations
pub async fn handle_site_info(ctx: &HandlerContext, domain: &str) -> Result<()> {
    let args = ctx.panel.site_info_args(domain);
    let raw = match process::run_capture("site_info", &ctx.panel.program, &args).await {
        Ok(raw) => raw,
        Err(e) => {
            ctx.channel
                .send(Outbound::domain_error(domain, e.to_string()))
                .await;
            return Ok(());
        }
    };

    let report = match parse_site_info(&raw) {
        Ok(ssl) => Outbound::SiteInfoResponse {
            domain: domain.to_string(),
            ssl,
        },
        Err(e) => Outbound::domain_error(domain, format!("{:#}", e)),
    };
    ctx.channel.send(report).await;
    Ok(())
}
