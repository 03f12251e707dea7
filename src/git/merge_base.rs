//! Incremental merge-base discovery in a shallow clone.
//!
//! A shallow clone of the head branch and a shallow fetch of the base branch
//! usually don't meet. We deepen both a few commits at a time until git can
//! name a common ancestor, and then keep going until every merge commit on the
//! head branch is connected too: the branch may have merged the base branch in
//! the middle, and then the tip-to-tip merge base is the merged-in commit rather
//! than the point the branch was forked from. Rebasing onto the base tip needs
//! the fork point, so all candidates are collapsed to a single ancestor.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::{GitError, GitResult, RepoDriver, remote_ref};
use crate::types::Sha;

/// Commits fetched per clone, fetch, or deepen step.
pub const FETCH_DEPTH: u32 = 10;

/// Deepens the clone at `dir` until HEAD and `origin/<branch>` share enough
/// history, and returns the common ancestor the head branch was forked from.
///
/// The base branch must already be fetched into `refs/remotes/origin/<branch>`.
/// Fails with [`GitError::Timeout`] when no answer is found within `timeout`.
pub async fn fetch_until_merge_base<D: RepoDriver>(
    driver: &D,
    dir: &Path,
    branch: &str,
    timeout: Duration,
) -> GitResult<Sha> {
    let deadline = Instant::now() + timeout;
    let target = remote_ref(branch);

    while Instant::now() < deadline {
        if let Some(base) = resolve(driver, dir, &target).await? {
            info!(%base, branch, "found merge base");
            return Ok(base);
        }
        debug!(branch, depth = FETCH_DEPTH, "history insufficient, deepening");
        driver.deepen(dir, FETCH_DEPTH).await?;
    }

    Err(GitError::Timeout(timeout))
}

/// One search round over the currently available history. `None` means the
/// history is still too shallow.
async fn resolve<D: RepoDriver>(driver: &D, dir: &Path, target: &str) -> GitResult<Option<Sha>> {
    let Some(base) = driver.merge_base(dir, "HEAD", target).await? else {
        return Ok(None);
    };

    let mut candidates = vec![base];
    let range = format!("{target}..HEAD");
    for parents in driver.merge_commit_parents(dir, &range).await? {
        for parent in parents {
            match driver.merge_base(dir, parent.as_str(), target).await? {
                Some(b) => {
                    if !candidates.contains(&b) {
                        candidates.push(b);
                    }
                }
                None => {
                    debug!(%parent, "merge parent not connected to target");
                    return Ok(None);
                }
            }
        }
    }

    collapse(driver, dir, candidates).await.map(Some)
}

/// Reduces candidates pairwise to their common ancestor.
async fn collapse<D: RepoDriver>(driver: &D, dir: &Path, candidates: Vec<Sha>) -> GitResult<Sha> {
    let mut iter = candidates.iter();
    let Some(first) = iter.next() else {
        return Err(GitError::NoCommonBase { candidates });
    };

    let mut acc = first.clone();
    for next in iter {
        match driver.merge_base(dir, acc.as_str(), next.as_str()).await? {
            Some(b) => acc = b,
            None => return Err(GitError::NoCommonBase { candidates }),
        }
    }
    Ok(acc)
}
