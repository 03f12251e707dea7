//! Deciding whether a PR can be merged now, never, or maybe later.
//!
//! GitHub reports mergeability as a `mergeable_state` tag that it recomputes in
//! the background. The tags fall into three classes and the split matters:
//! a PR in an indeterminate state (`behind`, `blocked`, anything unexpected) is
//! neither merged nor given up on, it is re-read until it settles or the retry
//! budget runs out.

use tracing::info;

use crate::config::Policy;
use crate::github::{GitHubApiError, PullRequestService};
use crate::retry::{AttemptOutcome, retry};
use crate::types::{MergeableState, PullRequestRef, SkipReason};

/// What a `mergeable_state` tag says about merging right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeabilityClass {
    /// Worth attempting the merge. GitHub has the final word.
    ProbablyReady,
    /// Won't become mergeable without someone changing the PR.
    NotReady,
    /// Ask again later.
    Indeterminate,
}

/// Classifies a mergeable state. An absent state counts as probably ready.
pub fn classify(state: Option<&MergeableState>) -> MergeabilityClass {
    match state {
        None
        | Some(MergeableState::Clean)
        | Some(MergeableState::HasHooks)
        | Some(MergeableState::Unknown)
        | Some(MergeableState::Unstable) => MergeabilityClass::ProbablyReady,
        Some(MergeableState::Dirty) | Some(MergeableState::Draft) => MergeabilityClass::NotReady,
        Some(_) => MergeabilityClass::Indeterminate,
    }
}

/// Policy pre-filter for merging. Returns the first reason to leave the PR alone.
///
/// `approvals` is the number of distinct approving reviewers; pass `None` to
/// skip the approval check (re-checks during polling don't re-count reviews).
pub fn merge_skip_reason(
    policy: &Policy,
    pr: &PullRequestRef,
    approvals: Option<u32>,
) -> Option<SkipReason> {
    if pr.state.is_merged() {
        return Some(SkipReason::AlreadyMerged);
    }
    if !pr.state.is_open() {
        return Some(SkipReason::NotOpen);
    }
    if pr.is_fork() && !policy.merge_forks {
        return Some(SkipReason::Fork);
    }
    if let Some(label) = pr
        .labels
        .iter()
        .find(|l| policy.merge_labels.blocking.contains(l))
    {
        return Some(SkipReason::BlockingLabel {
            label: label.clone(),
        });
    }
    if let Some(label) = policy
        .merge_labels
        .required
        .iter()
        .find(|l| !pr.has_label(l))
    {
        return Some(SkipReason::MissingLabel {
            label: label.clone(),
        });
    }
    if let Some(actual) = approvals
        && actual < policy.merge_required_approvals
    {
        return Some(SkipReason::MissingApprovals {
            required: policy.merge_required_approvals,
            actual,
        });
    }
    if policy.merge_method_label_required
        && !policy
            .merge_method_labels
            .iter()
            .any(|ml| pr.has_label(&ml.label))
    {
        return Some(SkipReason::MissingMergeMethodLabel);
    }
    None
}

/// One readiness check: pre-filter, then classify.
pub fn check_ready(policy: &Policy, pr: &PullRequestRef) -> AttemptOutcome {
    if let Some(reason) = merge_skip_reason(policy, pr, None) {
        info!(pr = %pr.number, %reason, "PR no longer eligible for merge");
        return AttemptOutcome::Failure;
    }

    let state = pr.mergeable_state.as_ref();
    let state_str = state.map(|s| s.as_str()).unwrap_or("none");
    match classify(state) {
        MergeabilityClass::ProbablyReady => {
            info!(pr = %pr.number, mergeable_state = state_str, "PR is probably ready");
            AttemptOutcome::Success
        }
        MergeabilityClass::NotReady => {
            info!(pr = %pr.number, mergeable_state = state_str, "PR not ready");
            AttemptOutcome::Failure
        }
        MergeabilityClass::Indeterminate => {
            info!(pr = %pr.number, mergeable_state = state_str, "PR state not settled");
            AttemptOutcome::Retry
        }
    }
}

/// Polls the PR until it is ready, definitely not ready, or the merge retry
/// budget is spent. The first check uses `pr` as given; each retry re-reads it.
pub async fn wait_until_ready<S: PullRequestService>(
    service: &S,
    policy: &Policy,
    pr: &PullRequestRef,
) -> Result<bool, GitHubApiError> {
    let max_retries = policy.merge_retry.max_retries;
    retry(
        policy.merge_retry,
        || async { Ok(check_ready(policy, pr)) },
        move || async move {
            let fresh = service.get_pr(&pr.repo, pr.number).await?;
            Ok::<_, GitHubApiError>(check_ready(policy, &fresh))
        },
        || info!(pr = %pr.number, tries = max_retries, "PR not ready to be merged"),
    )
    .await
}
