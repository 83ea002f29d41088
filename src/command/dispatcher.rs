//! Command dispatcher
//!
//! Maps each decoded command to exactly one handler. Handlers run on their
//! own tasks and may overlap; nothing serializes site operations against
//! self-update, matching the controller's expectations.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use super::handlers::{self, HandlerContext};
use warden_shared::{InboundCommand, Outbound};

pub struct CommandDispatcher {
    ctx: Arc<HandlerContext>,
}

impl CommandDispatcher {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    /// Route one command to its handler on a fresh task
    pub fn dispatch(&self, command: InboundCommand) {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            run_command(&ctx, command).await;
        });
    }
}

/// Invoke the handler, converting any unexpected failure into a generic
/// error report. A handler failure can never take down the channel or the
/// process.
pub(crate) async fn run_command(ctx: &HandlerContext, command: InboundCommand) {
    let kind = command.kind().to_string();
    let domain = command.domain().map(str::to_string);
    info!("executing command: {}", kind);

    if let Err(e) = route(ctx, command).await {
        error!("{} handler failed: {:#}", kind, e);
        ctx.channel
            .send(Outbound::Error {
                error: format!("{} failed: {:#}", kind, e),
                domain,
                original_message: None,
            })
            .await;
    }
}

async fn route(ctx: &HandlerContext, command: InboundCommand) -> Result<()> {
    match command {
        InboundCommand::CreateSite { domain, options } => {
            handlers::handle_create_site(ctx, &domain, &options).await
        }
        InboundCommand::DeleteSite { domain } => handlers::handle_delete_site(ctx, &domain).await,
        InboundCommand::DeploySsl { domain } => handlers::handle_deploy_ssl(ctx, &domain).await,
        InboundCommand::RedeploySsl { domain } => handlers::handle_redeploy_ssl(ctx, &domain).await,
        InboundCommand::TurnOffSsl { domain } => handlers::handle_turn_off_ssl(ctx, &domain).await,
        InboundCommand::SiteInfo { domain } => handlers::handle_site_info(ctx, &domain).await,
        InboundCommand::KeyRotation { new_key } => {
            handlers::handle_key_rotation(ctx, &new_key).await
        }
        InboundCommand::UpdateAgent => handlers::handle_update_agent(ctx).await,
        InboundCommand::RollbackAgent { commit_id } => {
            handlers::handle_rollback_agent(ctx, commit_id.as_deref()).await
        }
        InboundCommand::SystemUpdate => handlers::handle_system_update(ctx).await,
        InboundCommand::Unknown { kind } => handlers::handle_unknown(ctx, &kind).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelHandle, OutboundFrame};
    use crate::identity::{AgentIdentity, SecretStore};
    use crate::panel::{CertCli, PanelCli};
    use crate::update::{
        CodeFetcher, FetchOutcome, ResetTarget, Restarter, SelfUpdateManager,
    };
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use warden_shared::{Envelope, OperationPhase, SiteOperationKind};

    struct TestFetcher {
        before: String,
        after: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CodeFetcher for TestFetcher {
        async fn current_revision(&self) -> Result<String> {
            Ok(self.before.clone())
        }

        async fn fetch_and_reset(&self, _target: &ResetTarget) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchOutcome {
                version: self.after.clone(),
                log: String::new(),
            })
        }
    }

    struct TestRestarter {
        restarts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Restarter for TestRestarter {
        async fn request_restart(&self) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MemorySecretStore(Mutex<Option<String>>);

    #[async_trait]
    impl SecretStore for MemorySecretStore {
        async fn persist(&self, new_key: &str) -> Result<()> {
            *self.0.lock().unwrap() = Some(new_key.to_string());
            Ok(())
        }
    }

    struct TestHarness {
        ctx: HandlerContext,
        reports: Arc<Mutex<Vec<Envelope>>>,
        fetch_calls: Arc<AtomicUsize>,
        restarts: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// A handle whose frames land in a Vec, with flushes acknowledged
    fn collecting_handle(agent_id: &str) -> (ChannelHandle, Arc<Mutex<Vec<Envelope>>>) {
        let (handle, mut rx) = ChannelHandle::test_pair(agent_id);
        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports_clone = reports.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    OutboundFrame::Payload(envelope) => {
                        reports_clone.lock().unwrap().push(envelope);
                    }
                    OutboundFrame::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        (handle, reports)
    }

    fn harness(before: &str, after: &str, panel_body: &str, cert_body: &str) -> TestHarness {
        let dir = tempfile::tempdir().unwrap();
        let panel_script = write_script(dir.path(), "panelctl", panel_body);
        let cert_script = write_script(dir.path(), "certmgr", cert_body);
        let update_script = dir.path().join("update.sh");

        let (channel, reports) = collecting_handle("agent-1");
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let restarts = Arc::new(AtomicUsize::new(0));

        let ctx = HandlerContext {
            channel,
            identity: Arc::new(RwLock::new(AgentIdentity {
                agent_id: "agent-1".into(),
                shared_secret: "old-key".into(),
            })),
            secret_store: Arc::new(MemorySecretStore(Mutex::new(None))),
            panel: PanelCli::new(panel_script.to_str().unwrap()),
            cert: CertCli::new(cert_script.to_str().unwrap()),
            updater: Arc::new(SelfUpdateManager::new(
                Arc::new(TestFetcher {
                    before: before.into(),
                    after: after.into(),
                    calls: fetch_calls.clone(),
                }),
                Arc::new(TestRestarter {
                    restarts: restarts.clone(),
                }),
            )),
            update_script,
        };

        TestHarness {
            ctx,
            reports,
            fetch_calls,
            restarts,
            _dir: dir,
        }
    }

    impl TestHarness {
        fn payloads(&self) -> Vec<Outbound> {
            self.reports
                .lock()
                .unwrap()
                .iter()
                .map(|envelope| envelope.payload.clone())
                .collect()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_unknown_kind_yields_exactly_one_error_report() {
        let h = harness("a", "a", "exit 0", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::Unknown {
                kind: "reboot_host".into(),
            },
        )
        .await;
        settle().await;

        let payloads = h.payloads();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            Outbound::Error { error, .. } => assert!(error.contains("reboot_host")),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_site_reports_starting_then_completed() {
        let h = harness("a", "a", "echo \"created:$3\"", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::CreateSite {
                domain: "example.com".into(),
                options: serde_json::json!({}),
            },
        )
        .await;
        settle().await;

        let payloads = h.payloads();
        assert_eq!(payloads.len(), 2);
        match &payloads[0] {
            Outbound::SiteOperation {
                operation,
                status,
                domain,
                ..
            } => {
                assert_eq!(*operation, SiteOperationKind::Create);
                assert_eq!(*status, OperationPhase::Starting);
                assert_eq!(domain, "example.com");
            }
            other => panic!("unexpected report: {:?}", other),
        }
        match &payloads[1] {
            Outbound::SiteOperation {
                operation,
                status,
                domain,
                output,
                ..
            } => {
                assert_eq!(*operation, SiteOperationKind::Create);
                assert_eq!(*status, OperationPhase::Completed);
                assert_eq!(domain, "example.com");
                assert!(output.as_deref().unwrap().contains("created:example.com"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_site_failure_carries_code_and_stderr() {
        let h = harness("a", "a", "echo gone-wrong >&2; exit 7", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::DeleteSite {
                domain: "example.com".into(),
            },
        )
        .await;
        settle().await;

        let payloads = h.payloads();
        match payloads.last().unwrap() {
            Outbound::SiteOperation { status, error, .. } => {
                assert_eq!(*status, OperationPhase::Failed);
                let error = error.as_deref().unwrap();
                assert!(error.contains("code 7"), "got: {}", error);
                assert!(error.contains("gone-wrong"), "got: {}", error);
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redeploy_reports_completed_despite_turn_off_failure() {
        // disable fails, deploy answers the renewal prompt and succeeds
        let cert_body = r#"case "$1" in
disable) echo "no active certificate" >&2; exit 1 ;;
deploy)
  printf 'Please select an option from below\nType the appropriate number\n'
  read choice
  echo "renewed:$choice"
  ;;
esac"#;
        let h = harness("a", "a", "exit 0", cert_body);

        run_command(
            &h.ctx,
            InboundCommand::RedeploySsl {
                domain: "x.test".into(),
            },
        )
        .await;
        settle().await;

        let payloads = h.payloads();
        let statuses: Vec<OperationPhase> = payloads
            .iter()
            .map(|p| match p {
                Outbound::SiteOperation { status, .. } => *status,
                other => panic!("unexpected report: {:?}", other),
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                OperationPhase::Starting,
                OperationPhase::SslRedeploying,
                OperationPhase::Completed,
            ]
        );
        match payloads.last().unwrap() {
            Outbound::SiteOperation {
                operation, output, ..
            } => {
                assert_eq!(*operation, SiteOperationKind::RedeploySsl);
                assert!(output.as_deref().unwrap().contains("renewed:2"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deploy_answers_reinstall_prompt() {
        let cert_body = r#"echo "Please select an option from below
1: Reinstall existing certificate
Type the appropriate number"
read choice
echo "installed:$choice""#;
        let h = harness("a", "a", "exit 0", cert_body);

        run_command(
            &h.ctx,
            InboundCommand::DeploySsl {
                domain: "x.test".into(),
            },
        )
        .await;
        settle().await;

        match h.payloads().last().unwrap() {
            Outbound::SiteOperation { status, output, .. } => {
                assert_eq!(*status, OperationPhase::Completed);
                assert!(output.as_deref().unwrap().contains("installed:1"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_site_info_extracts_tls_details() {
        let panel_body = r#"echo '{"ssl":{"enabled":true,"provider":"letsencrypt","expiry":"2026-11-02"}}'"#;
        let h = harness("a", "a", panel_body, "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::SiteInfo {
                domain: "x.test".into(),
            },
        )
        .await;
        settle().await;

        match h.payloads().last().unwrap() {
            Outbound::SiteInfoResponse { domain, ssl } => {
                assert_eq!(domain, "x.test");
                assert!(ssl.enabled);
                assert_eq!(ssl.provider.as_deref(), Some("letsencrypt"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_site_info_parse_failure_is_domain_scoped_error() {
        let h = harness("a", "a", "echo not-json-at-all", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::SiteInfo {
                domain: "x.test".into(),
            },
        )
        .await;
        settle().await;

        match h.payloads().last().unwrap() {
            Outbound::Error { domain, .. } => assert_eq!(domain.as_deref(), Some("x.test")),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_agent_already_current_skips_restart() {
        let h = harness("abc", "abc", "exit 0", "exit 0");

        run_command(&h.ctx, InboundCommand::UpdateAgent).await;
        settle().await;

        assert_eq!(h.restarts.load(Ordering::SeqCst), 0);
        let payloads = h.payloads();
        assert!(payloads.iter().any(|p| matches!(
            p,
            Outbound::UpdateOperation { status: OperationPhase::Completed, output: Some(output), .. }
                if output.contains("already up to date")
        )));
        assert!(payloads.iter().any(|p| matches!(
            p,
            Outbound::AgentUpdated { success: true, message: Some(_), .. }
        )));
    }

    #[tokio::test]
    async fn test_update_agent_with_new_revision_restarts() {
        let h = harness("abc", "def", "exit 0", "exit 0");

        run_command(&h.ctx, InboundCommand::UpdateAgent).await;
        settle().await;

        assert_eq!(h.restarts.load(Ordering::SeqCst), 1);
        assert!(h.payloads().iter().any(|p| matches!(
            p,
            Outbound::AgentUpdated { success: true, version: Some(version), .. }
                if version == "def"
        )));
    }

    #[tokio::test]
    async fn test_rollback_without_commit_id_fails_without_fetching() {
        let h = harness("abc", "def", "exit 0", "exit 0");

        run_command(&h.ctx, InboundCommand::RollbackAgent { commit_id: None }).await;
        settle().await;

        assert_eq!(h.fetch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.restarts.load(Ordering::SeqCst), 0);
        let payloads = h.payloads();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            Outbound::RollbackOperation { status, error, .. } => {
                assert_eq!(*status, OperationPhase::Failed);
                assert!(error.as_deref().unwrap().contains("commitId"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rollback_with_commit_id_resets_and_restarts() {
        let h = harness("abc", "1234567", "exit 0", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::RollbackAgent {
                commit_id: Some("1234567".into()),
            },
        )
        .await;
        settle().await;

        assert_eq!(h.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.restarts.load(Ordering::SeqCst), 1);
        assert!(h.payloads().iter().any(|p| matches!(
            p,
            Outbound::RollbackOperation {
                status: OperationPhase::Completed,
                git_version: Some(version),
                ..
            } if version == "1234567"
        )));
    }

    #[tokio::test]
    async fn test_key_rotation_swaps_in_memory_secret() {
        let h = harness("a", "a", "exit 0", "exit 0");

        run_command(
            &h.ctx,
            InboundCommand::KeyRotation {
                new_key: "fresh-key".into(),
            },
        )
        .await;
        settle().await;

        assert_eq!(h.ctx.identity.read().await.shared_secret, "fresh-key");
        assert!(h.payloads().iter().any(|p| matches!(
            p,
            Outbound::Status { operation, status: OperationPhase::Completed, .. }
                if operation == "key_rotation"
        )));
    }

    #[tokio::test]
    async fn test_system_update_streams_chunks_then_completes() {
        let h = harness("a", "a", "exit 0", "exit 0");
        write_script(h._dir.path(), "update.sh", "echo step-one; echo step-two");

        run_command(&h.ctx, InboundCommand::SystemUpdate).await;
        settle().await;

        let payloads = h.payloads();
        assert!(matches!(
            payloads.first().unwrap(),
            Outbound::Status { status: OperationPhase::Starting, .. }
        ));
        let streamed: Vec<&str> = payloads
            .iter()
            .filter_map(|p| match p {
                Outbound::Status {
                    status: OperationPhase::Running,
                    output: Some(output),
                    ..
                } => Some(output.as_str()),
                _ => None,
            })
            .collect();
        assert!(streamed.iter().any(|chunk| chunk.contains("step-one")));
        assert!(matches!(
            payloads.last().unwrap(),
            Outbound::Status { status: OperationPhase::Completed, .. }
        ));
    }

    #[tokio::test]
    async fn test_system_update_missing_script_fails_fast() {
        let h = harness("a", "a", "exit 0", "exit 0");

        run_command(&h.ctx, InboundCommand::SystemUpdate).await;
        settle().await;

        let payloads = h.payloads();
        assert_eq!(payloads.len(), 1);
        assert!(matches!(
            &payloads[0],
            Outbound::Status { status: OperationPhase::Failed, .. }
        ));
    }
}
