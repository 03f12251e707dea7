//! GitHub access.
//!
//! Everything the bot asks of GitHub goes through [`PullRequestService`]. The
//! production implementation is [`OctocrabClient`]; tests use an in-memory fake
//! that records calls.

mod client;
mod error;

pub use client::OctocrabClient;
pub use error::{GitHubApiError, GitHubErrorKind};

use std::collections::BTreeSet;
use std::future::Future;

use crate::types::{MergeMethod, PrNumber, PullRequestRef, RepoId, Sha};

/// At most this many PRs are handled per batch.
pub const MAX_PR_COUNT: u8 = 10;

/// Outcome of merging one branch into another through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchMerge {
    /// Nothing to merge (HTTP 204).
    NoOp,
    /// A merge commit was created.
    Merged(Sha),
}

/// Protection settings relevant to deleting a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchProtection {
    /// `None` when the protection rules don't mention deletions.
    pub allow_deletions: Option<bool>,
}

impl BranchProtection {
    pub fn forbids_deletion(&self) -> bool {
        self.allow_deletions == Some(false)
    }
}

/// Which open PRs to list. Results come most recently updated first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrFilter {
    /// Only PRs targeting this branch.
    pub base: Option<String>,
    pub limit: u8,
}

impl Default for PrFilter {
    fn default() -> Self {
        Self {
            base: None,
            limit: MAX_PR_COUNT,
        }
    }
}

impl PrFilter {
    pub fn targeting(branch: impl Into<String>) -> Self {
        Self {
            base: Some(branch.into()),
            ..Self::default()
        }
    }
}

/// The GitHub operations the bot needs.
pub trait PullRequestService: Send + Sync {
    fn get_pr(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> impl Future<Output = Result<PullRequestRef, GitHubApiError>> + Send;

    fn list_open_prs(
        &self,
        repo: &RepoId,
        filter: &PrFilter,
    ) -> impl Future<Output = Result<Vec<PullRequestRef>, GitHubApiError>> + Send;

    /// Merges a PR, guarded by the expected head `sha`.
    fn merge_pr(
        &self,
        repo: &RepoId,
        number: PrNumber,
        sha: &Sha,
        method: MergeMethod,
        commit_title: Option<&str>,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    /// Merges `head` into `base` (both branch names in `repo`).
    fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
    ) -> impl Future<Output = Result<BranchMerge, GitHubApiError>> + Send;

    /// Logins of reviewers whose latest verdict on the PR is an approval.
    fn list_approving_reviewers(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> impl Future<Output = Result<BTreeSet<String>, GitHubApiError>> + Send;

    fn remove_label(
        &self,
        repo: &RepoId,
        number: PrNumber,
        label: &str,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    fn delete_branch(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> impl Future<Output = Result<(), GitHubApiError>> + Send;

    /// Returns `None` when the branch is not protected.
    fn get_branch_protection(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> impl Future<Output = Result<Option<BranchProtection>, GitHubApiError>> + Send;

    /// URL git can clone and push `repo` with. May embed credentials, never log it.
    fn clone_url(&self, repo: &RepoId) -> String;
}
