//! Entry points tying update and merge together for one PR or a batch.
//!
//! A batch never stops at the first broken PR: each PR's error is logged and
//! recorded in the [`BatchSummary`], and the next PR is processed.

use tracing::{error, info, instrument};

use crate::config::Policy;
use crate::error::Result;
use crate::git::RepoDriver;
use crate::github::{PrFilter, PullRequestService};
use crate::merge::{MergeOutcome, merge_pull_request};
use crate::types::{PrNumber, PullRequestRef, RepoId, SkipReason};
use crate::update::{UpdateOutcome, update_pull_request};

/// What happened to one PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestReport {
    pub number: PrNumber,
    pub update: UpdateOutcome,
    /// `None` when only an update was requested.
    pub merge: Option<MergeOutcome>,
}

/// Per-PR results of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: Vec<PullRequestReport>,
    /// PRs whose processing failed, with the error message.
    pub failed: Vec<(PrNumber, String)>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, number: PrNumber, result: Result<PullRequestReport>) {
        match result {
            Ok(report) => self.processed.push(report),
            Err(e) => {
                error!(pr = %number, error = %e, "failed to process PR");
                self.failed.push((number, e.to_string()));
            }
        }
    }
}

pub struct Runner<S, D> {
    service: S,
    driver: D,
    policy: Policy,
}

impl<S, D> Runner<S, D>
where
    S: PullRequestService,
    D: RepoDriver,
{
    pub fn new(service: S, driver: D, policy: Policy) -> Self {
        Self {
            service,
            driver,
            policy,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Updates the PR, then merges it.
    ///
    /// When the update moved the head branch (or found it already moved), the
    /// PR is re-read first so the merge is guarded by the current head sha.
    #[instrument(skip(self, pr), fields(repo = %pr.repo, pr = %pr.number))]
    pub async fn process_pull_request(&self, pr: &PullRequestRef) -> Result<PullRequestReport> {
        let update = update_pull_request(&self.service, &self.driver, &self.policy, pr).await?;

        let moved = matches!(
            update,
            UpdateOutcome::Updated { .. } | UpdateOutcome::Skipped(SkipReason::StaleHead { .. })
        );
        let merge = if moved {
            let fresh = self.service.get_pr(&pr.repo, pr.number).await?;
            merge_pull_request(&self.service, &self.policy, &fresh).await?
        } else {
            merge_pull_request(&self.service, &self.policy, pr).await?
        };

        info!(?update, ?merge, "PR processed");
        Ok(PullRequestReport {
            number: pr.number,
            update,
            merge: Some(merge),
        })
    }

    /// Updates the most recently updated open PRs targeting `branch`, after a
    /// push to it.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn process_branch_update(&self, repo: &RepoId, branch: &str) -> Result<BatchSummary> {
        let prs = self
            .service
            .list_open_prs(repo, &PrFilter::targeting(branch))
            .await?;
        if prs.is_empty() {
            info!(branch, "no PRs to update");
        }

        let mut summary = BatchSummary::default();
        for pr in &prs {
            let result = update_pull_request(&self.service, &self.driver, &self.policy, pr)
                .await
                .map(|update| PullRequestReport {
                    number: pr.number,
                    update,
                    merge: None,
                });
            summary.record(pr.number, result);
        }
        Ok(summary)
    }

    /// Updates and merges every open PR matching `filter`.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn process_open_pull_requests(
        &self,
        repo: &RepoId,
        filter: &PrFilter,
    ) -> Result<BatchSummary> {
        let prs = self.service.list_open_prs(repo, filter).await?;

        let mut summary = BatchSummary::default();
        for pr in &prs {
            let result = self.process_pull_request(pr).await;
            summary.record(pr.number, result);
        }
        Ok(summary)
    }
}
