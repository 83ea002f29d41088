//! Self-Update Manager
//!
//! Advances or rolls back the agent's own working tree through the
//! version-control collaborator and requests the restart that follows.

mod git;
mod manager;

pub use git::GitFetcher;
pub use manager::{
    find_failure_marker, CodeFetcher, FetchOutcome, ResetTarget, Restarter, SelfUpdateManager,
    SupervisedRestart, UpdateOutcome,
};
