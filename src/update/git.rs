//! Version-control collaborator backed by the git CLI

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use super::{CodeFetcher, FetchOutcome, ResetTarget};

pub struct GitFetcher {
    repo_dir: PathBuf,
    upstream: String,
}

impl GitFetcher {
    pub fn new(repo_dir: impl Into<PathBuf>, upstream: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            upstream: upstream.into(),
        }
    }

    /// Run one git command, returning (stdout, stderr) on a zero exit
    async fn git(&self, args: &[&str]) -> Result<(String, String)> {
        let output = Command::new("git")
            .current_dir(&self.repo_dir)
            .args(args)
            .output()
            .await
            .map_err(|e| anyhow!("failed to execute git {}: {}", args.join(" "), e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed with code {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        Ok((stdout, stderr))
    }
}

#[async_trait]
impl CodeFetcher for GitFetcher {
    async fn current_revision(&self) -> Result<String> {
        let (stdout, _) = self.git(&["rev-parse", "HEAD"]).await?;
        let revision = stdout.trim().to_string();
        if revision.is_empty() {
            return Err(anyhow!("git rev-parse returned empty output"));
        }
        Ok(revision)
    }

    async fn fetch_and_reset(&self, target: &ResetTarget) -> Result<FetchOutcome> {
        let mut log = String::new();

        let (stdout, stderr) = self.git(&["fetch", "--all"]).await?;
        log.push_str(&stdout);
        log.push_str(&stderr);

        let reset_ref = match target {
            ResetTarget::Upstream => self.upstream.as_str(),
            ResetTarget::Revision(revision) => revision.as_str(),
        };
        let (stdout, stderr) = self.git(&["reset", "--hard", reset_ref]).await?;
        log.push_str(&stdout);
        log.push_str(&stderr);

        let version = self.current_revision().await?;
        Ok(FetchOutcome { version, log })
    }
}
