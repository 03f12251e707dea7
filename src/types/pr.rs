//! Pull request types and state representations.
//!
//! `PullRequestRef` is the bot's snapshot of a PR as last read from GitHub. It is
//! read fresh at the start of each run and re-read whenever GitHub's answer was
//! ambiguous; the orchestrators never mutate it in place.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{PrNumber, RepoId, Sha};

/// The state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    /// The PR is open.
    Open,
    /// The PR was closed without merging.
    Closed,
    /// The PR was merged.
    Merged,
}

impl PrState {
    /// Derives the tri-state from GitHub's `state` string and `merged` flag.
    pub fn from_api(state: &str, merged: bool) -> Self {
        if merged {
            PrState::Merged
        } else if state.eq_ignore_ascii_case("open") {
            PrState::Open
        } else {
            PrState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PrState::Open)
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, PrState::Merged)
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrState::Open => f.write_str("open"),
            PrState::Closed => f.write_str("closed"),
            PrState::Merged => f.write_str("merged"),
        }
    }
}

/// GitHub's REST `mergeable_state` tag.
///
/// GitHub computes this asynchronously after every push to the head or base
/// branch, so a freshly read value may lag reality. Values GitHub adds in the
/// future are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MergeableState {
    /// Head branch is behind the base branch.
    Behind,
    /// Required checks or reviews are not satisfied.
    Blocked,
    /// Mergeable, all checks passing.
    Clean,
    /// Merge conflicts.
    Dirty,
    /// The PR is a draft.
    Draft,
    /// Mergeable with passing commit status and pre-receive hooks.
    HasHooks,
    /// Not computed yet.
    Unknown,
    /// Mergeable, non-required checks failing.
    Unstable,
    /// Any tag this crate doesn't know about.
    Other(String),
}

impl MergeableState {
    /// Returns the API string for this state.
    pub fn as_str(&self) -> &str {
        match self {
            MergeableState::Behind => "behind",
            MergeableState::Blocked => "blocked",
            MergeableState::Clean => "clean",
            MergeableState::Dirty => "dirty",
            MergeableState::Draft => "draft",
            MergeableState::HasHooks => "has_hooks",
            MergeableState::Unknown => "unknown",
            MergeableState::Unstable => "unstable",
            MergeableState::Other(s) => s,
        }
    }
}

impl From<String> for MergeableState {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "behind" => MergeableState::Behind,
            "blocked" => MergeableState::Blocked,
            "clean" => MergeableState::Clean,
            "dirty" => MergeableState::Dirty,
            "draft" => MergeableState::Draft,
            "has_hooks" => MergeableState::HasHooks,
            "unknown" => MergeableState::Unknown,
            "unstable" => MergeableState::Unstable,
            _ => MergeableState::Other(s),
        }
    }
}

impl From<&str> for MergeableState {
    fn from(s: &str) -> Self {
        MergeableState::from(s.to_string())
    }
}

impl From<MergeableState> for String {
    fn from(state: MergeableState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for MergeableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side (head or base) of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// Branch name, without `refs/heads/`.
    pub name: String,
    /// Commit the branch pointed at when the PR was read.
    pub sha: Sha,
    /// Repository holding the branch. `None` when a fork was deleted.
    pub repo: Option<RepoId>,
}

/// A snapshot of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Repository the PR was opened against (the base repository).
    pub repo: RepoId,
    pub number: PrNumber,
    pub title: String,
    pub body: Option<String>,
    /// Login of the PR author.
    pub author: Option<String>,
    pub state: PrState,
    pub head: BranchRef,
    pub base: BranchRef,
    /// `None` when GitHub omitted the field (it does so in list responses).
    pub mergeable_state: Option<MergeableState>,
    /// Label names, in the order GitHub returned them.
    pub labels: Vec<String>,
    /// Number of commits on the PR, when known.
    pub commits: Option<u64>,
}

impl PullRequestRef {
    /// Returns true if the head branch lives in a different repository than the base.
    pub fn is_fork(&self) -> bool {
        self.head.repo.as_ref() != Some(&self.repo)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Merge method accepted by GitHub's merge endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// Create a merge commit.
    Merge,
    /// Squash all commits into one.
    Squash,
    /// Rebase commits onto the base branch.
    Rebase,
}

impl MergeMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "merge" => Some(MergeMethod::Merge),
            "squash" => Some(MergeMethod::Squash),
            "rebase" => Some(MergeMethod::Rebase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a PR was left alone.
///
/// Skips are permanent for the current run: they are never retried and are
/// reported as outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The PR is closed.
    NotOpen,
    /// The PR has already been merged.
    AlreadyMerged,
    /// The head branch lives in another repository.
    Fork,
    /// A blocking label is present.
    BlockingLabel { label: String },
    /// A required label is missing.
    MissingLabel { label: String },
    /// Fewer distinct approvers than required.
    MissingApprovals { required: u32, actual: u32 },
    /// No merge-method label present while one is required.
    MissingMergeMethodLabel,
    /// The head branch moved while the bot was working on it.
    StaleHead { expected: Sha, actual: Sha },
    /// GitHub's mergeable state does not allow the operation.
    MergeableState { state: Option<MergeableState> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotOpen => f.write_str("PR is not open"),
            SkipReason::AlreadyMerged => f.write_str("PR is already merged"),
            SkipReason::Fork => f.write_str("PR branch is from an external repository"),
            SkipReason::BlockingLabel { label } => write!(f, "blocking label present: {label}"),
            SkipReason::MissingLabel { label } => write!(f, "required label missing: {label}"),
            SkipReason::MissingApprovals { required, actual } => {
                write!(f, "missing approvals: {actual} of {required}")
            }
            SkipReason::MissingMergeMethodLabel => {
                f.write_str("required merge method label missing")
            }
            SkipReason::StaleHead { expected, actual } => write!(
                f,
                "head moved from {} to {}",
                expected.short(),
                actual.short()
            ),
            SkipReason::MergeableState { state: Some(state) } => {
                write!(f, "mergeable_state is {state}")
            }
            SkipReason::MergeableState { state: None } => f.write_str("mergeable_state unknown"),
        }
    }
}
