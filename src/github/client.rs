//! Octocrab-backed [`PullRequestService`].
//!
//! Responses are deserialized into small local structs holding only the fields
//! the bot reads, then mapped into domain types. GitHub's payloads carry far
//! more than that, and list responses omit fields (`merged`, `mergeable_state`)
//! that single-PR responses include.

use std::collections::{BTreeMap, BTreeSet};

use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BranchMerge, BranchProtection, GitHubApiError, PrFilter, PullRequestService,
};
use crate::types::{
    BranchRef, MergeMethod, MergeableState, PrNumber, PrState, PullRequestRef, RepoId, Sha,
};

const REVIEWS_PER_PAGE: usize = 100;

/// A GitHub API client authenticated with a token.
#[derive(Clone)]
pub struct OctocrabClient {
    client: Octocrab,

    /// Kept for git clone URLs.
    token: String,
}

impl OctocrabClient {
    pub fn new(client: Octocrab, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    /// Creates a client from a GitHub token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, octocrab::Error> {
        let token = token.into();
        let client = Octocrab::builder().personal_token(token.clone()).build()?;
        Ok(Self::new(client, token))
    }

    async fn delete(&self, route: &str) -> Result<(), GitHubApiError> {
        let response = self.client._delete(route, None::<&()>).await?;
        octocrab::map_github_error(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for OctocrabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabClient").finish_non_exhaustive()
    }
}

fn repo_route(repo: &RepoId) -> String {
    format!("/repos/{}/{}", repo.owner, repo.repo)
}

// ─── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PullPayload {
    number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    merged: Option<bool>,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    mergeable_state: Option<String>,
    #[serde(default)]
    user: Option<UserPayload>,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    #[serde(default)]
    commits: Option<u64>,
    head: BranchPayload,
    base: BranchPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Debug, Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
    #[serde(default)]
    repo: Option<RepoPayload>,
}

#[derive(Debug, Deserialize)]
struct RepoPayload {
    full_name: String,
}

impl BranchPayload {
    fn into_branch_ref(self) -> Result<BranchRef, GitHubApiError> {
        let sha = Sha::parse(&self.sha).map_err(|e| {
            GitHubApiError::invalid_response(format!("invalid SHA for {}: {e}", self.ref_field))
        })?;
        Ok(BranchRef {
            name: self.ref_field,
            sha,
            repo: self
                .repo
                .and_then(|r| RepoId::parse_full_name(&r.full_name)),
        })
    }
}

impl PullPayload {
    /// `requested` is the repository the PR was looked up in, used when the
    /// payload's base repository is missing.
    fn into_pull_request(self, requested: &RepoId) -> Result<PullRequestRef, GitHubApiError> {
        let merged = self.merged.unwrap_or(false) || self.merged_at.is_some();
        let head = self.head.into_branch_ref()?;
        let base = self.base.into_branch_ref()?;
        Ok(PullRequestRef {
            repo: base.repo.clone().unwrap_or_else(|| requested.clone()),
            number: PrNumber(self.number),
            title: self.title.unwrap_or_default(),
            body: self.body,
            author: self.user.map(|u| u.login),
            state: PrState::from_api(&self.state, merged),
            head,
            base,
            mergeable_state: self.mergeable_state.map(MergeableState::from),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            commits: self.commits,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    #[serde(default)]
    user: Option<UserPayload>,
    state: String,
}

/// Reduces a review history to the reviewers whose latest verdict is an approval.
/// Plain comments don't change a reviewer's verdict.
fn approvers(reviews: Vec<ReviewPayload>) -> BTreeSet<String> {
    let mut latest: BTreeMap<String, String> = BTreeMap::new();
    for review in reviews {
        let Some(user) = review.user else { continue };
        if review.state.eq_ignore_ascii_case("COMMENTED") {
            continue;
        }
        latest.insert(user.login, review.state.to_ascii_uppercase());
    }
    latest
        .into_iter()
        .filter(|(_, state)| state == "APPROVED")
        .map(|(login, _)| login)
        .collect()
}

#[derive(Debug, Serialize)]
struct ListParams<'a> {
    state: &'static str,
    sort: &'static str,
    direction: &'static str,
    per_page: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: usize,
    page: u32,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    sha: &'a str,
    merge_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_title: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct BranchMergeRequest<'a> {
    base: &'a str,
    head: &'a str,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchInfoPayload {
    #[serde(default)]
    protected: bool,
}

#[derive(Debug, Deserialize)]
struct ProtectionPayload {
    #[serde(default)]
    allow_deletions: Option<EnabledPayload>,
}

#[derive(Debug, Deserialize)]
struct EnabledPayload {
    enabled: bool,
}

// ─── Service ──────────────────────────────────────────────────────────────────

impl PullRequestService for OctocrabClient {
    async fn get_pr(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<PullRequestRef, GitHubApiError> {
        debug!(%repo, pr = %number, "getting PR");
        let route = format!("{}/pulls/{}", repo_route(repo), number.0);
        let payload: PullPayload = self.client.get(route, None::<&()>).await?;
        payload.into_pull_request(repo)
    }

    async fn list_open_prs(
        &self,
        repo: &RepoId,
        filter: &PrFilter,
    ) -> Result<Vec<PullRequestRef>, GitHubApiError> {
        debug!(%repo, ?filter, "listing open PRs");
        let route = format!("{}/pulls", repo_route(repo));
        let params = ListParams {
            state: "open",
            sort: "updated",
            direction: "desc",
            per_page: filter.limit,
            base: filter.base.as_deref(),
        };
        let payloads: Vec<PullPayload> = self.client.get(route, Some(&params)).await?;
        payloads
            .into_iter()
            .map(|p| p.into_pull_request(repo))
            .collect()
    }

    async fn merge_pr(
        &self,
        repo: &RepoId,
        number: PrNumber,
        sha: &Sha,
        method: MergeMethod,
        commit_title: Option<&str>,
    ) -> Result<(), GitHubApiError> {
        let route = format!("{}/pulls/{}/merge", repo_route(repo), number.0);
        let request = MergeRequest {
            sha: sha.as_str(),
            merge_method: method.as_str(),
            commit_title,
        };
        let response: MergeResponse = self.client.put(route, Some(&request)).await?;
        if response.merged {
            Ok(())
        } else {
            Err(GitHubApiError::new(
                None,
                response
                    .message
                    .unwrap_or_else(|| "merge returned merged=false".to_string()),
            ))
        }
    }

    async fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
    ) -> Result<BranchMerge, GitHubApiError> {
        let route = format!("{}/merges", repo_route(repo));
        let request = BranchMergeRequest { base, head };
        let response = self.client._post(route, Some(&request)).await?;
        let response = octocrab::map_github_error(response).await?;
        if response.status().as_u16() == 204 {
            return Ok(BranchMerge::NoOp);
        }

        let body = self.client.body_to_string(response).await?;
        let commit: CommitPayload = serde_json::from_str(&body)
            .map_err(|e| GitHubApiError::invalid_response(format!("merge response: {e}")))?;
        let sha = Sha::parse(&commit.sha)
            .map_err(|e| GitHubApiError::invalid_response(format!("merge response: {e}")))?;
        Ok(BranchMerge::Merged(sha))
    }

    async fn list_approving_reviewers(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<BTreeSet<String>, GitHubApiError> {
        let route = format!("{}/pulls/{}/reviews", repo_route(repo), number.0);
        let mut reviews = Vec::new();
        let mut page = 1u32;
        loop {
            let params = PageParams {
                per_page: REVIEWS_PER_PAGE,
                page,
            };
            let batch: Vec<ReviewPayload> = self.client.get(&route, Some(&params)).await?;
            let is_last_page = batch.len() < REVIEWS_PER_PAGE;
            reviews.extend(batch);
            if is_last_page {
                break;
            }
            page += 1;
        }
        Ok(approvers(reviews))
    }

    async fn remove_label(
        &self,
        repo: &RepoId,
        number: PrNumber,
        label: &str,
    ) -> Result<(), GitHubApiError> {
        let route = format!(
            "{}/issues/{}/labels/{}",
            repo_route(repo),
            number.0,
            urlencoding::encode(label)
        );
        self.delete(&route).await
    }

    async fn delete_branch(&self, repo: &RepoId, branch: &str) -> Result<(), GitHubApiError> {
        let route = format!("{}/git/refs/heads/{}", repo_route(repo), branch);
        self.delete(&route).await
    }

    async fn get_branch_protection(
        &self,
        repo: &RepoId,
        branch: &str,
    ) -> Result<Option<BranchProtection>, GitHubApiError> {
        let route = format!(
            "{}/branches/{}",
            repo_route(repo),
            urlencoding::encode(branch)
        );
        let info: BranchInfoPayload = self.client.get(&route, None::<&()>).await?;
        if !info.protected {
            return Ok(None);
        }

        let rules: ProtectionPayload = self
            .client
            .get(format!("{route}/protection"), None::<&()>)
            .await?;
        Ok(Some(BranchProtection {
            allow_deletions: rules.allow_deletions.map(|a| a.enabled),
        }))
    }

    fn clone_url(&self, repo: &RepoId) -> String {
        format!(
            "https://x-access-token:{}@github.com/{}/{}.git",
            self.token, repo.owner, repo.repo
        )
    }
}
