//! Update/rollback orchestration over the version-control collaborator

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Result of a fetch/reset performed by the version-control collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Revision the tree resolves to after the reset
    pub version: String,
    /// Combined diagnostic text from the underlying tool
    pub log: String,
}

/// Where a fetch/reset should land
#[derive(Debug, Clone, PartialEq)]
pub enum ResetTarget {
    /// The tracked upstream branch
    Upstream,
    /// An explicit revision
    Revision(String),
}

/// Version-control collaborator interface
#[async_trait]
pub trait CodeFetcher: Send + Sync {
    /// Currently checked-out revision
    async fn current_revision(&self) -> Result<String>;

    /// Fetch all remote refs, then hard-reset the tree to the target
    async fn fetch_and_reset(&self, target: &ResetTarget) -> Result<FetchOutcome>;
}

/// Requests a process restart after a successful update or rollback
#[async_trait]
pub trait Restarter: Send + Sync {
    /// Implementations may not return
    async fn request_restart(&self);
}

/// Restart by exiting cleanly; the supervisor relaunches the process
pub struct SupervisedRestart;

#[async_trait]
impl Restarter for SupervisedRestart {
    async fn request_restart(&self) {
        info!("exiting for supervised restart");
        std::process::exit(0);
    }
}

/// Diagnostic substrings that mark a structurally-successful fetch/reset as
/// failed. Success-by-absence-of-known-text is fragile; exit codes remain
/// the primary signal.
const FAILURE_MARKERS: &[&str] = &[
    "fatal:",
    "permission denied",
    "not found",
    "unresolved",
    "denied",
    "cannot",
    "unable to",
];

/// Scan diagnostic text case-insensitively for a known failure marker
pub fn find_failure_marker(log: &str) -> Option<&'static str> {
    let lowered = log.to_lowercase();
    FAILURE_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}

/// Outcome of an update or rollback attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Tree already matched the target; no restart needed
    AlreadyCurrent { version: String },
    /// Tree moved to a new revision; a restart must follow
    Updated { version: String, log: String },
}

impl UpdateOutcome {
    pub fn version(&self) -> &str {
        match self {
            UpdateOutcome::AlreadyCurrent { version } => version,
            UpdateOutcome::Updated { version, .. } => version,
        }
    }
}

pub struct SelfUpdateManager {
    fetcher: Arc<dyn CodeFetcher>,
    restarter: Arc<dyn Restarter>,
}

impl SelfUpdateManager {
    pub fn new(fetcher: Arc<dyn CodeFetcher>, restarter: Arc<dyn Restarter>) -> Self {
        Self { fetcher, restarter }
    }

    /// Advance the tree to the tracked upstream branch
    pub async fn update(&self) -> Result<UpdateOutcome> {
        let before = self.fetcher.current_revision().await?;
        let outcome = self.fetcher.fetch_and_reset(&ResetTarget::Upstream).await?;
        check_log(&outcome.log)?;

        if outcome.version == before {
            Ok(UpdateOutcome::AlreadyCurrent {
                version: outcome.version,
            })
        } else {
            Ok(UpdateOutcome::Updated {
                version: outcome.version,
                log: outcome.log,
            })
        }
    }

    /// Hard-reset the tree to an explicit revision
    pub async fn rollback(&self, commit_id: &str) -> Result<UpdateOutcome> {
        let outcome = self
            .fetcher
            .fetch_and_reset(&ResetTarget::Revision(commit_id.to_string()))
            .await?;
        check_log(&outcome.log)?;

        Ok(UpdateOutcome::Updated {
            version: outcome.version,
            log: outcome.log,
        })
    }

    /// Callers must flush pending reports to the transport first
    pub async fn request_restart(&self) {
        self.restarter.request_restart().await;
    }
}

fn check_log(log: &str) -> Result<()> {
    if let Some(marker) = find_failure_marker(log) {
        return Err(anyhow!("fetch diagnostics contain {:?}: {}", marker, log.trim()));
    }
    Ok(())
}
