//! Merging a PR once policy and GitHub allow it.

use tracing::{debug, info, warn};

use crate::config::{ConfigError, Policy};
use crate::error::Result;
use crate::github::{GitHubApiError, PullRequestService};
use crate::message::{commit_title, extract_body};
use crate::readiness::{merge_skip_reason, wait_until_ready};
use crate::retry::{AttemptOutcome, retry};
use crate::types::{MergeMethod, PullRequestRef, SkipReason};

/// Result of one merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Policy says to leave the PR alone.
    Skipped(SkipReason),
    /// GitHub's mergeable state never allowed the merge.
    NotReady,
    /// The PR author doesn't match the configured author filter.
    AuthorFiltered,
    /// GitHub rejected the merge, permanently or for the whole retry budget.
    MergeFailed,
}

/// Picks the merge method: the method of the one merge-method label on the
/// PR, or the policy default when there is none.
pub fn merge_method(policy: &Policy, pr: &PullRequestRef) -> Result<MergeMethod, ConfigError> {
    let found: Vec<_> = pr
        .labels
        .iter()
        .flat_map(|label| {
            policy
                .merge_method_labels
                .iter()
                .filter(move |ml| ml.label == *label)
        })
        .collect();

    match found.as_slice() {
        [] => Ok(policy.merge_method),
        [only] => {
            info!(label = %only.label, method = %only.method, "merge method chosen by label");
            Ok(only.method)
        }
        many => Err(ConfigError::MultipleMergeMethodLabels {
            labels: many.iter().map(|ml| ml.label.clone()).collect(),
        }),
    }
}

/// Merges the PR if policy allows, waiting for GitHub to agree.
pub async fn merge_pull_request<S: PullRequestService>(
    service: &S,
    policy: &Policy,
    pr: &PullRequestRef,
) -> Result<MergeOutcome> {
    let mut skip = merge_skip_reason(policy, pr, None);
    // reviews are paginated, so they are only read for PRs that pass everything else
    if skip.is_none() && policy.merge_required_approvals > 0 {
        let approvers = service.list_approving_reviewers(&pr.repo, pr.number).await?;
        debug!(pr = %pr.number, ?approvers, "approving reviewers");
        let approvals = u32::try_from(approvers.len()).unwrap_or(u32::MAX);
        skip = merge_skip_reason(policy, pr, Some(approvals));
    }

    if let Some(reason) = skip {
        info!(pr = %pr.number, %reason, "skipping PR merge");
        return Ok(MergeOutcome::Skipped(reason));
    }

    info!(pr = %pr.number, title = %pr.title, "merging PR");

    if !wait_until_ready(service, policy, pr).await? {
        return Ok(MergeOutcome::NotReady);
    }

    let body = extract_body(policy.merge_commit_message_regex.as_ref(), pr.body.as_deref());
    let title = commit_title(&policy.merge_commit_message, pr, body.as_deref())?;

    if let Some(wanted) = &policy.merge_filter_author
        && pr.author.as_deref() != Some(wanted.as_str())
    {
        info!(pr = %pr.number, author = ?pr.author, filter = %wanted, "PR author does not match filter");
        return Ok(MergeOutcome::AuthorFiltered);
    }

    let method = merge_method(policy, pr)?;
    if !try_merge(service, policy, pr, method, title.as_deref()).await? {
        return Ok(MergeOutcome::MergeFailed);
    }

    info!(pr = %pr.number, "PR successfully merged");
    remove_labels(service, policy, pr).await;
    if policy.merge_delete_branch {
        delete_branch(service, pr).await;
    }
    Ok(MergeOutcome::Merged)
}

/// Asks GitHub to merge, guarded by the head sha we checked. Retries re-read
/// the PR first, since an earlier attempt may have gone through after all.
async fn try_merge<S: PullRequestService>(
    service: &S,
    policy: &Policy,
    pr: &PullRequestRef,
    method: MergeMethod,
    title: Option<&str>,
) -> Result<bool, GitHubApiError> {
    let max_retries = policy.merge_retry.max_retries;
    retry(
        policy.merge_retry,
        || attempt_merge(service, pr, method, title),
        move || async move {
            let fresh = service.get_pr(&pr.repo, pr.number).await?;
            if fresh.state.is_merged() {
                info!(pr = %pr.number, "PR was merged in the meantime");
                return Ok(AttemptOutcome::Success);
            }
            attempt_merge(service, pr, method, title).await
        },
        || info!(pr = %pr.number, tries = max_retries, "PR could not be merged"),
    )
    .await
}

async fn attempt_merge<S: PullRequestService>(
    service: &S,
    pr: &PullRequestRef,
    method: MergeMethod,
    title: Option<&str>,
) -> Result<AttemptOutcome, GitHubApiError> {
    match service
        .merge_pr(&pr.repo, pr.number, &pr.head.sha, method, title)
        .await
    {
        Ok(()) => Ok(AttemptOutcome::Success),
        Err(e) if e.kind.is_permanent_merge_rejection() => {
            info!(pr = %pr.number, error = %e, "cannot merge PR");
            Ok(AttemptOutcome::Failure)
        }
        Err(e) => {
            info!(pr = %pr.number, error = %e, "failed to merge PR");
            Ok(AttemptOutcome::Retry)
        }
    }
}

async fn remove_labels<S: PullRequestService>(service: &S, policy: &Policy, pr: &PullRequestRef) {
    let labels: Vec<&String> = pr
        .labels
        .iter()
        .filter(|l| policy.merge_remove_labels.contains(l))
        .collect();
    if labels.is_empty() {
        debug!(pr = %pr.number, "no labels to remove");
        return;
    }

    for label in labels {
        match service.remove_label(&pr.repo, pr.number, label).await {
            Ok(()) => info!(pr = %pr.number, %label, "removed label"),
            Err(e) if e.is_not_found() => {
                debug!(pr = %pr.number, %label, "label already removed")
            }
            Err(e) => warn!(pr = %pr.number, %label, error = %e, "failed to remove label"),
        }
    }
}

async fn delete_branch<S: PullRequestService>(service: &S, pr: &PullRequestRef) {
    if pr.is_fork() {
        info!(pr = %pr.number, "branch is from external repository, skipping delete");
        return;
    }
    let repo = pr.head.repo.as_ref().unwrap_or(&pr.repo);
    let branch = &pr.head.name;

    match service.get_branch_protection(repo, branch).await {
        Ok(Some(protection)) if protection.forbids_deletion() => {
            info!(pr = %pr.number, %branch, "branch is protected and cannot be deleted");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(pr = %pr.number, %branch, error = %e, "failed to read branch protection");
            return;
        }
    }

    match service.delete_branch(repo, branch).await {
        Ok(()) => info!(pr = %pr.number, %branch, "merged branch has been deleted"),
        Err(e) if e.is_not_found() => {
            info!(pr = %pr.number, %branch, "merged branch is already gone")
        }
        Err(e) => warn!(pr = %pr.number, %branch, error = %e, "failed to delete branch"),
    }
}
