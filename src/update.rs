//! Bringing a PR's head branch up to date with its base branch.
//!
//! Two update methods are supported. `merge` asks GitHub to merge the base
//! branch into the head branch, which needs no local checkout. `rebase` does
//! the work locally: it clones just enough of both branches to find where the
//! head branch forked off, replays the head branch onto the base tip and
//! force-pushes the result.

use std::sync::Mutex;

use tracing::{debug, info};

use crate::config::{Policy, UpdateMethod};
use crate::error::Result;
use crate::git::{FETCH_DEPTH, RepoDriver, WorkingCopy, fetch_until_merge_base};
use crate::github::{BranchMerge, GitHubApiError, PullRequestService};
use crate::retry::{AttemptOutcome, retry};
use crate::types::{MergeableState, PullRequestRef, Sha, SkipReason};

/// Result of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The head branch now points at `new_sha`.
    Updated { new_sha: Sha },
    /// Nothing to do, the head branch already contains the base branch.
    UpToDate { sha: Sha },
    Skipped(SkipReason),
}

/// Policy pre-filter for updates. Forks are always skipped: the bot can't
/// push to them.
pub fn update_skip_reason(policy: &Policy, pr: &PullRequestRef) -> Option<SkipReason> {
    if pr.state.is_merged() {
        return Some(SkipReason::AlreadyMerged);
    }
    if !pr.state.is_open() {
        return Some(SkipReason::NotOpen);
    }
    if pr.is_fork() {
        return Some(SkipReason::Fork);
    }
    if let Some(label) = pr
        .labels
        .iter()
        .find(|l| policy.update_labels.blocking.contains(l))
    {
        return Some(SkipReason::BlockingLabel {
            label: label.clone(),
        });
    }
    policy
        .update_labels
        .required
        .iter()
        .find(|l| !pr.has_label(l))
        .map(|label| SkipReason::MissingLabel {
            label: label.clone(),
        })
}

fn settled(state: Option<&MergeableState>) -> bool {
    !matches!(state, None | Some(MergeableState::Unknown))
}

/// Updates the PR's head branch with the configured method.
pub async fn update_pull_request<S, D>(
    service: &S,
    driver: &D,
    policy: &Policy,
    pr: &PullRequestRef,
) -> Result<UpdateOutcome>
where
    S: PullRequestService,
    D: RepoDriver,
{
    info!(pr = %pr.number, title = %pr.title, "updating PR");

    if let Some(reason) = update_skip_reason(policy, pr) {
        info!(pr = %pr.number, %reason, "skipping update");
        return Ok(UpdateOutcome::Skipped(reason));
    }

    let pr = poll_mergeable_state(service, policy, pr).await?;

    match &pr.mergeable_state {
        Some(MergeableState::Behind) => match policy.update_method {
            UpdateMethod::Merge => merge_base_into_head(service, &pr).await,
            UpdateMethod::Rebase => rebase_onto_base(service, driver, policy, &pr).await,
        },
        Some(MergeableState::Clean) | Some(MergeableState::HasHooks) => {
            info!(pr = %pr.number, "no update necessary");
            Ok(UpdateOutcome::UpToDate {
                sha: pr.head.sha.clone(),
            })
        }
        state => {
            let reason = SkipReason::MergeableState {
                state: state.clone(),
            };
            info!(pr = %pr.number, %reason, "no update done");
            Ok(UpdateOutcome::Skipped(reason))
        }
    }
}

/// Re-reads the PR until GitHub has computed its mergeable state, within the
/// update retry budget. Returns the last PR read.
async fn poll_mergeable_state<S: PullRequestService>(
    service: &S,
    policy: &Policy,
    pr: &PullRequestRef,
) -> Result<PullRequestRef> {
    if settled(pr.mergeable_state.as_ref()) {
        return Ok(pr.clone());
    }

    let latest = Mutex::new(pr.clone());
    let latest_ref = &latest;
    let max_retries = policy.update_retry.max_retries;
    retry(
        policy.update_retry,
        || async { Ok(AttemptOutcome::Retry) },
        move || async move {
            let fresh = service.get_pr(&pr.repo, pr.number).await?;
            let outcome = if settled(fresh.mergeable_state.as_ref()) {
                AttemptOutcome::Success
            } else {
                debug!(pr = %pr.number, "mergeable state not computed yet");
                AttemptOutcome::Retry
            };
            if let Ok(mut slot) = latest_ref.lock() {
                *slot = fresh;
            }
            Ok::<_, GitHubApiError>(outcome)
        },
        || info!(pr = %pr.number, tries = max_retries, "mergeable state still unknown"),
    )
    .await?;

    Ok(latest.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
}

async fn merge_base_into_head<S: PullRequestService>(
    service: &S,
    pr: &PullRequestRef,
) -> Result<UpdateOutcome> {
    let repo = pr.head.repo.as_ref().unwrap_or(&pr.repo);
    debug!(
        pr = %pr.number,
        base = %pr.base.name,
        head = %pr.head.name,
        "merging latest base changes into head"
    );

    match service
        .merge_branches(repo, &pr.head.name, &pr.base.name)
        .await?
    {
        BranchMerge::NoOp => {
            info!(pr = %pr.number, "no merge performed, branch is up to date");
            Ok(UpdateOutcome::UpToDate {
                sha: pr.head.sha.clone(),
            })
        }
        BranchMerge::Merged(new_sha) => {
            info!(pr = %pr.number, branch = %pr.head.name, sha = %new_sha, "merge succeeded");
            Ok(UpdateOutcome::Updated { new_sha })
        }
    }
}

async fn rebase_onto_base<S, D>(
    service: &S,
    driver: &D,
    policy: &Policy,
    pr: &PullRequestRef,
) -> Result<UpdateOutcome>
where
    S: PullRequestService,
    D: RepoDriver,
{
    let head_ref = &pr.head.name;
    let base_ref = &pr.base.name;
    let repo = pr.head.repo.as_ref().unwrap_or(&pr.repo);
    let depth = pr
        .commits
        .and_then(|n| u32::try_from(n.saturating_add(1)).ok())
        .unwrap_or(FETCH_DEPTH);

    let wc = WorkingCopy::create()?;
    let dir = wc.path();

    debug!(pr = %pr.number, branch = %head_ref, depth, "cloning");
    driver
        .clone_branch(&service.clone_url(repo), dir, head_ref, depth)
        .await?;

    debug!(pr = %pr.number, branch = %base_ref, "fetching base branch");
    driver.fetch(dir, base_ref, FETCH_DEPTH).await?;
    // git rebase needs the history back to the fork point locally
    let fork_point =
        fetch_until_merge_base(driver, dir, base_ref, policy.merge_base_timeout).await?;

    let head = driver.head_commit(dir).await?;
    if head != pr.head.sha {
        info!(pr = %pr.number, %head, "HEAD changed, skipping");
        return Ok(UpdateOutcome::Skipped(SkipReason::StaleHead {
            expected: pr.head.sha.clone(),
            actual: head,
        }));
    }

    let onto = driver.ref_commit(dir, base_ref).await?;
    info!(pr = %pr.number, %head, %fork_point, %onto, branch = %base_ref, "rebasing");
    driver.rebase(dir, &onto).await?;

    let new_head = driver.head_commit(dir).await?;
    if new_head == head {
        info!(pr = %pr.number, branch = %head_ref, "already up to date");
        return Ok(UpdateOutcome::UpToDate { sha: head });
    }

    debug!(pr = %pr.number, branch = %head_ref, "pushing");
    driver.push(dir, head_ref, true).await?;
    info!(pr = %pr.number, branch = %head_ref, from = %head, to = %new_head, "updated");
    Ok(UpdateOutcome::Updated { new_sha: new_head })
}
