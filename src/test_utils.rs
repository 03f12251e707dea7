//! Shared test fixtures: a sample PR, throwaway git remotes, and in-memory
//! fakes for the GitHub and git seams.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;

use crate::git::{GitError, GitResult, RepoDriver, remote_ref};
use crate::github::{
    BranchMerge, BranchProtection, GitHubApiError, PrFilter, PullRequestService,
};
use crate::types::{
    BranchRef, MergeMethod, MergeableState, PrNumber, PrState, PullRequestRef, RepoId, Sha,
};

pub fn sha(s: &str) -> Sha {
    Sha::parse(s).unwrap()
}

/// An open, labelled, clean PR from a branch of the same repository.
pub fn pull_request() -> PullRequestRef {
    let repo = RepoId::new("username", "repository");
    PullRequestRef {
        repo: repo.clone(),
        number: PrNumber(1),
        title: "Update README".to_string(),
        body: Some("This PR updates the README".to_string()),
        author: Some("username".to_string()),
        state: PrState::Open,
        head: BranchRef {
            name: "patch-1".to_string(),
            sha: sha("2c3b4d5"),
            repo: Some(repo.clone()),
        },
        base: BranchRef {
            name: "master".to_string(),
            sha: sha("45600fe"),
            repo: Some(repo),
        },
        mergeable_state: Some(MergeableState::Clean),
        labels: vec!["automerge".to_string()],
        commits: Some(2),
    }
}

// ---------------------------------------------------------------------------
// Real git
// ---------------------------------------------------------------------------

/// A local repository that stands in for the GitHub remote.
///
/// It is non-bare so commits can be made directly on any branch, and accepts
/// pushes to whatever branch happens to be checked out.
pub struct TestRemote {
    dir: TempDir,
}

impl TestRemote {
    pub fn new() -> Self {
        let remote = Self {
            dir: TempDir::new().unwrap(),
        };
        remote.git(&["init", "-q"]);
        remote.git(&["config", "receive.denyCurrentBranch", "ignore"]);
        remote
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `file://` so shallow clones work.
    pub fn url(&self) -> String {
        format!("file://{}", self.path().display())
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .current_dir(self.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(["-c", "user.name=GitHub", "-c", "user.email=noreply@github.com"])
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn is_empty(&self) -> bool {
        !Command::new("git")
            .current_dir(self.path())
            .args(["rev-parse", "--verify", "-q", "HEAD"])
            .output()
            .unwrap()
            .status
            .success()
    }

    fn switch_to(&self, branch: &str) {
        if self.is_empty() {
            self.git(&["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")]);
        } else {
            self.git(&["checkout", "-q", "-f", branch]);
        }
    }

    /// Adds an empty commit to `branch`. The first commit in the repository
    /// creates the branch.
    pub fn commit_on(&self, branch: &str, message: &str) -> Sha {
        self.switch_to(branch);
        self.git(&["commit", "-q", "--allow-empty", "-m", message]);
        self.rev("HEAD")
    }

    /// Adds a commit writing `content` to `path` on `branch`.
    pub fn commit_file_on(&self, branch: &str, path: &str, content: &str) -> Sha {
        self.switch_to(branch);
        std::fs::write(self.path().join(path), content).unwrap();
        self.git(&["add", path]);
        self.git(&["commit", "-q", "-m", &format!("update {path}")]);
        self.rev("HEAD")
    }

    pub fn branch(&self, name: &str, from: &str) {
        self.git(&["branch", "-f", name, from]);
    }

    /// Merges `from` into `branch` with a merge commit.
    pub fn merge_into(&self, branch: &str, from: &str) -> Sha {
        self.switch_to(branch);
        self.git(&["merge", "-q", "--no-ff", "--no-edit", from]);
        self.rev("HEAD")
    }

    pub fn rev(&self, rev: &str) -> Sha {
        sha(&self.git(&["rev-parse", "--verify", rev]))
    }

    pub fn is_ancestor(&self, ancestor: &Sha, descendant: &Sha) -> bool {
        Command::new("git")
            .current_dir(self.path())
            .args(["merge-base", "--is-ancestor", ancestor.as_str(), descendant.as_str()])
            .status()
            .unwrap()
            .success()
    }
}

// ---------------------------------------------------------------------------
// In-memory git
// ---------------------------------------------------------------------------

/// A commit graph with named branches, standing in for a remote repository.
#[derive(Debug, Clone, Default)]
pub struct FakeHistory {
    parents: HashMap<Sha, Vec<Sha>>,
    branches: HashMap<String, Sha>,
    next_id: u64,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit(&mut self, parents: Vec<Sha>) -> Sha {
        self.next_id += 1;
        let id = sha(&format!("{:040x}", self.next_id));
        self.parents.insert(id.clone(), parents);
        id
    }

    /// Appends `n` commits on top of `parent` (a root commit if `None`) and
    /// points `branch` at the last one.
    pub fn linear(&mut self, branch: &str, parent: Option<&Sha>, n: usize) -> Sha {
        let mut tip = parent.cloned();
        for _ in 0..n {
            let id = self.commit(tip.into_iter().collect());
            tip = Some(id);
        }
        let tip = tip.unwrap();
        self.branches.insert(branch.to_string(), tip.clone());
        tip
    }

    /// Merges the tip of `from` into `branch`.
    pub fn merge(&mut self, branch: &str, from: &str) -> Sha {
        let parents = vec![self.branches[branch].clone(), self.branches[from].clone()];
        let id = self.commit(parents);
        self.branches.insert(branch.to_string(), id.clone());
        id
    }

    pub fn tip(&self, branch: &str) -> Sha {
        self.branches[branch].clone()
    }

    pub fn driver(&self) -> FakeDriver {
        FakeDriver {
            remote: self.clone(),
            state: Mutex::new(LocalClone::default()),
            deepen_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct LocalClone {
    head: Option<Sha>,
    /// Fetched tips and how many commits deep each was fetched.
    windows: Vec<(Sha, u32)>,
    refs: HashMap<String, Sha>,
    /// Commits made locally, e.g. by a rebase.
    local: HashMap<Sha, Vec<Sha>>,
    next_local: u64,
    clones: Vec<(String, String, u32)>,
    pushes: Vec<FakePush>,
    deepen_calls: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePush {
    pub branch: String,
    pub force: bool,
    pub sha: Sha,
}

/// A [`RepoDriver`] over a [`FakeHistory`] that models shallow fetches: a
/// commit is present locally if it is fewer than `depth` commits from a
/// fetched tip, and parents outside that window are invisible.
#[derive(Debug)]
pub struct FakeDriver {
    remote: FakeHistory,
    state: Mutex<LocalClone>,
    deepen_delay: Duration,
}

fn not_found(rev: &str) -> GitError {
    GitError::CommandFailed {
        command: format!("git rev-parse {rev}"),
        code: Some(128),
        stderr: format!("fatal: bad revision '{rev}'"),
    }
}

impl FakeDriver {
    pub fn with_deepen_delay(mut self, delay: Duration) -> Self {
        self.deepen_delay = delay;
        self
    }

    pub fn deepen_calls(&self) -> usize {
        self.state.lock().unwrap().deepen_calls
    }

    /// `(branch, depth)` of every clone.
    pub fn clones(&self) -> Vec<(String, u32)> {
        let state = self.state.lock().unwrap();
        state
            .clones
            .iter()
            .map(|(_, branch, depth)| (branch.clone(), *depth))
            .collect()
    }

    pub fn pushes(&self) -> Vec<FakePush> {
        self.state.lock().unwrap().pushes.clone()
    }

    /// Every commit present locally, mapped to whether its parents are too.
    /// Commits on the edge of a fetch window are shallow and show no parents.
    fn visible(&self, state: &LocalClone) -> HashMap<Sha, bool> {
        let mut seen: HashMap<Sha, bool> = state.local.keys().map(|c| (c.clone(), true)).collect();
        for (tip, depth) in &state.windows {
            let mut frontier = vec![tip.clone()];
            for level in 0..*depth {
                let complete = level + 1 < *depth;
                let mut next = Vec::new();
                for commit in frontier {
                    if complete && let Some(parents) = self.remote.parents.get(&commit) {
                        next.extend(parents.iter().cloned());
                    }
                    let entry = seen.entry(commit).or_insert(false);
                    *entry |= complete;
                }
                frontier = next;
            }
        }
        seen
    }

    fn parents_of(&self, state: &LocalClone, visible: &HashMap<Sha, bool>, commit: &Sha) -> Vec<Sha> {
        if let Some(parents) = state.local.get(commit) {
            return parents.clone();
        }
        match visible.get(commit) {
            Some(true) => self.remote.parents.get(commit).cloned().unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn ancestors(&self, state: &LocalClone, visible: &HashMap<Sha, bool>, start: &Sha) -> HashSet<Sha> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.clone()];
        while let Some(commit) = stack.pop() {
            if seen.insert(commit.clone()) {
                stack.extend(self.parents_of(state, visible, &commit));
            }
        }
        seen
    }

    fn resolve(&self, state: &LocalClone, visible: &HashMap<Sha, bool>, rev: &str) -> GitResult<Sha> {
        let found = match rev {
            "HEAD" => state.head.clone(),
            r if r.starts_with("refs/") => state.refs.get(r).cloned(),
            r => Sha::parse(r).ok().filter(|s| visible.contains_key(s)),
        };
        found.ok_or_else(|| not_found(rev))
    }

    fn fetched(&self, branch: &str) -> GitResult<Sha> {
        self.remote
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| not_found(branch))
    }
}

impl RepoDriver for FakeDriver {
    async fn clone_branch(&self, url: &str, _dir: &Path, branch: &str, depth: u32) -> GitResult<()> {
        let tip = self.fetched(branch)?;
        let mut state = self.state.lock().unwrap();
        state
            .clones
            .push((url.to_string(), branch.to_string(), depth));
        state.head = Some(tip.clone());
        state.windows.push((tip, depth));
        Ok(())
    }

    async fn fetch(&self, _dir: &Path, branch: &str, depth: u32) -> GitResult<()> {
        let tip = self.fetched(branch)?;
        let mut state = self.state.lock().unwrap();
        state.refs.insert(remote_ref(branch), tip.clone());
        match state.windows.iter_mut().find(|(t, _)| *t == tip) {
            Some(window) => window.1 = window.1.max(depth),
            None => state.windows.push((tip, depth)),
        }
        Ok(())
    }

    async fn deepen(&self, _dir: &Path, depth: u32) -> GitResult<()> {
        if !self.deepen_delay.is_zero() {
            tokio::time::sleep(self.deepen_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.deepen_calls += 1;
        for window in &mut state.windows {
            window.1 += depth;
        }
        Ok(())
    }

    async fn merge_base(&self, _dir: &Path, a: &str, b: &str) -> GitResult<Option<Sha>> {
        let state = self.state.lock().unwrap();
        let visible = self.visible(&state);
        let a = self.resolve(&state, &visible, a)?;
        let b = self.resolve(&state, &visible, b)?;
        let from_a = self.ancestors(&state, &visible, &a);
        let from_b = self.ancestors(&state, &visible, &b);
        let common: Vec<Sha> = from_a.intersection(&from_b).cloned().collect();
        // Best common ancestor: one that no other common ancestor descends from.
        let best = common.iter().find(|candidate| {
            common.iter().all(|other| {
                other == *candidate
                    || !self
                        .ancestors(&state, &visible, other)
                        .contains(*candidate)
            })
        });
        Ok(best.cloned())
    }

    async fn merge_commit_parents(&self, _dir: &Path, range: &str) -> GitResult<Vec<Vec<Sha>>> {
        let state = self.state.lock().unwrap();
        let visible = self.visible(&state);
        let (exclude, include) = range.split_once("..").ok_or_else(|| not_found(range))?;
        let exclude = self.resolve(&state, &visible, exclude)?;
        let include = self.resolve(&state, &visible, include)?;
        let excluded = self.ancestors(&state, &visible, &exclude);
        Ok(self
            .ancestors(&state, &visible, &include)
            .into_iter()
            .filter(|c| !excluded.contains(c))
            .map(|c| self.parents_of(&state, &visible, &c))
            .filter(|parents| parents.len() > 1)
            .collect())
    }

    async fn head_commit(&self, _dir: &Path) -> GitResult<Sha> {
        let state = self.state.lock().unwrap();
        state.head.clone().ok_or_else(|| not_found("HEAD"))
    }

    async fn ref_commit(&self, _dir: &Path, branch: &str) -> GitResult<Sha> {
        let state = self.state.lock().unwrap();
        let name = remote_ref(branch);
        state.refs.get(&name).cloned().ok_or_else(|| not_found(&name))
    }

    async fn rebase(&self, _dir: &Path, onto: &Sha) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        let visible = self.visible(&state);
        let head = state.head.clone().ok_or_else(|| not_found("HEAD"))?;
        if self.ancestors(&state, &visible, &head).contains(onto) {
            return Ok(());
        }
        // The replayed branch is collapsed into a single commit.
        state.next_local += 1;
        let id = sha(&format!("ff{:038x}", state.next_local));
        state.local.insert(id.clone(), vec![onto.clone()]);
        state.head = Some(id);
        Ok(())
    }

    async fn push(&self, _dir: &Path, branch: &str, force: bool) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        let sha = state.head.clone().ok_or_else(|| not_found("HEAD"))?;
        state.pushes.push(FakePush {
            branch: branch.to_string(),
            force,
            sha,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory GitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub number: PrNumber,
    pub sha: Sha,
    pub method: MergeMethod,
    pub commit_title: Option<String>,
}

#[derive(Debug, Default)]
struct FakeGitHubState {
    prs: HashMap<PrNumber, PullRequestRef>,
    /// Served by `get_pr` before falling back to `prs`.
    pr_reads: VecDeque<PullRequestRef>,
    get_pr_calls: usize,
    list_filters: Vec<PrFilter>,
    merge_results: VecDeque<Result<(), GitHubApiError>>,
    merges: Vec<MergeCall>,
    branch_merge_results: VecDeque<Result<BranchMerge, GitHubApiError>>,
    branch_merges: Vec<(RepoId, String, String)>,
    approvers: BTreeSet<String>,
    review_reads: usize,
    removed_labels: Vec<String>,
    delete_branch_results: VecDeque<Result<(), GitHubApiError>>,
    deleted_branches: Vec<String>,
    protection: Option<BranchProtection>,
}

/// A [`PullRequestService`] with scripted answers that records every call.
#[derive(Debug)]
pub struct FakeGitHub {
    state: Mutex<FakeGitHubState>,
    clone_url: String,
}

impl Default for FakeGitHub {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            clone_url: "file:///fake".to_string(),
        }
    }
}

impl FakeGitHub {
    pub fn with_pr(pr: PullRequestRef) -> Self {
        let github = Self::default();
        github.add_pr(pr);
        github
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = url.into();
        self
    }

    pub fn add_pr(&self, pr: PullRequestRef) {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
    }

    /// Answers for the next `get_pr` calls, in order.
    pub fn queue_pr_reads(&self, prs: impl IntoIterator<Item = PullRequestRef>) {
        self.state.lock().unwrap().pr_reads.extend(prs);
    }

    /// Results for the next `merge_pr` calls. Once exhausted, merges succeed.
    pub fn queue_merge_results(&self, results: impl IntoIterator<Item = Result<(), GitHubApiError>>) {
        self.state.lock().unwrap().merge_results.extend(results);
    }

    /// Results for the next `merge_branches` calls. Once exhausted, they are no-ops.
    pub fn queue_branch_merge_results(
        &self,
        results: impl IntoIterator<Item = Result<BranchMerge, GitHubApiError>>,
    ) {
        self.state.lock().unwrap().branch_merge_results.extend(results);
    }

    /// Results for the next `delete_branch` calls. Once exhausted, deletes succeed.
    pub fn queue_delete_branch_results(
        &self,
        results: impl IntoIterator<Item = Result<(), GitHubApiError>>,
    ) {
        self.state.lock().unwrap().delete_branch_results.extend(results);
    }

    pub fn set_approvers<'a>(&self, logins: impl IntoIterator<Item = &'a str>) {
        self.state.lock().unwrap().approvers = logins.into_iter().map(String::from).collect();
    }

    pub fn set_protection(&self, protection: BranchProtection) {
        self.state.lock().unwrap().protection = Some(protection);
    }

    pub fn get_pr_calls(&self) -> usize {
        self.state.lock().unwrap().get_pr_calls
    }

    pub fn review_reads(&self) -> usize {
        self.state.lock().unwrap().review_reads
    }

    pub fn list_filters(&self) -> Vec<PrFilter> {
        self.state.lock().unwrap().list_filters.clone()
    }

    pub fn merges(&self) -> Vec<MergeCall> {
        self.state.lock().unwrap().merges.clone()
    }

    /// `(repo, base, head)` of every branch merge.
    pub fn branch_merges(&self) -> Vec<(RepoId, String, String)> {
        self.state.lock().unwrap().branch_merges.clone()
    }

    pub fn removed_labels(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_labels.clone()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_branches.clone()
    }
}

impl PullRequestService for FakeGitHub {
    async fn get_pr(&self, _repo: &RepoId, number: PrNumber) -> Result<PullRequestRef, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.get_pr_calls += 1;
        if let Some(pr) = state.pr_reads.pop_front() {
            return Ok(pr);
        }
        state
            .prs
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHubApiError::new(Some(404), "Not Found"))
    }

    async fn list_open_prs(
        &self,
        _repo: &RepoId,
        filter: &PrFilter,
    ) -> Result<Vec<PullRequestRef>, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.list_filters.push(filter.clone());
        let mut prs: Vec<PullRequestRef> = state
            .prs
            .values()
            .filter(|pr| pr.state.is_open())
            .filter(|pr| filter.base.as_ref().is_none_or(|b| *b == pr.base.name))
            .cloned()
            .collect();
        prs.sort_by_key(|pr| pr.number);
        prs.truncate(usize::from(filter.limit));
        Ok(prs)
    }

    async fn merge_pr(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        sha: &Sha,
        method: MergeMethod,
        commit_title: Option<&str>,
    ) -> Result<(), GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.merges.push(MergeCall {
            number,
            sha: sha.clone(),
            method,
            commit_title: commit_title.map(String::from),
        });
        state.merge_results.pop_front().unwrap_or(Ok(()))
    }

    async fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
    ) -> Result<BranchMerge, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .branch_merges
            .push((repo.clone(), base.to_string(), head.to_string()));
        state
            .branch_merge_results
            .pop_front()
            .unwrap_or(Ok(BranchMerge::NoOp))
    }

    async fn list_approving_reviewers(
        &self,
        _repo: &RepoId,
        _number: PrNumber,
    ) -> Result<BTreeSet<String>, GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.review_reads += 1;
        Ok(state.approvers.clone())
    }

    async fn remove_label(
        &self,
        _repo: &RepoId,
        _number: PrNumber,
        label: &str,
    ) -> Result<(), GitHubApiError> {
        self.state
            .lock()
            .unwrap()
            .removed_labels
            .push(label.to_string());
        Ok(())
    }

    async fn delete_branch(&self, _repo: &RepoId, branch: &str) -> Result<(), GitHubApiError> {
        let mut state = self.state.lock().unwrap();
        state.delete_branch_results.pop_front().unwrap_or(Ok(()))?;
        state.deleted_branches.push(branch.to_string());
        Ok(())
    }

    async fn get_branch_protection(
        &self,
        _repo: &RepoId,
        _branch: &str,
    ) -> Result<Option<BranchProtection>, GitHubApiError> {
        Ok(self.state.lock().unwrap().protection.clone())
    }

    fn clone_url(&self, _repo: &RepoId) -> String {
        self.clone_url.clone()
    }
}
