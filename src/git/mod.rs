//! Local git operations for branch updates.
//!
//! The bot never keeps a repository around between runs. A rebase update works
//! in a throwaway [`WorkingCopy`]: shallow-clone the head branch, fetch the base
//! branch next to it, deepen until the two histories meet, rebase and push.
//!
//! All git access goes through the [`RepoDriver`] trait so the merge-base search
//! can be exercised against an in-memory history in tests. [`GitCli`] is the
//! real implementation and shells out to the `git` binary.

pub mod merge_base;

pub use merge_base::{FETCH_DEPTH, fetch_until_merge_base};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use crate::types::Sha;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git exited unsuccessfully.
    #[error("git command failed with code {code:?}: {command}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The merge-base search ran out of time.
    #[error("no merge base found within {0:?}")]
    Timeout(Duration),

    /// Candidate merge bases were found but they share no common ancestor.
    #[error("failed to find a common base for {candidates:?}")]
    NoCommonBase { candidates: Vec<Sha> },

    /// Git printed something that is not a commit id.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Name and email used for commits git creates during a rebase.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CommitIdentity {
    name: String,
    email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "GitHub".to_string(),
            email: "noreply@github.com".to_string(),
        }
    }
}

/// Operations the update path needs from a local repository.
///
/// `dir` is always the working tree of a clone made by [`RepoDriver::clone_branch`].
/// The base branch is tracked as `refs/remotes/origin/<branch>`.
pub trait RepoDriver: Send + Sync {
    /// Shallow-clones `branch` of `url` into `dir`, `depth` commits deep.
    fn clone_branch(
        &self,
        url: &str,
        dir: &Path,
        branch: &str,
        depth: u32,
    ) -> impl Future<Output = GitResult<()>> + Send;

    /// Fetches `branch` into `refs/remotes/origin/<branch>`, `depth` commits deep.
    fn fetch(
        &self,
        dir: &Path,
        branch: &str,
        depth: u32,
    ) -> impl Future<Output = GitResult<()>> + Send;

    /// Extends every shallow boundary by `depth` commits.
    fn deepen(&self, dir: &Path, depth: u32) -> impl Future<Output = GitResult<()>> + Send;

    /// Returns the best common ancestor of two revisions, or `None` if the local
    /// history holds none.
    fn merge_base(
        &self,
        dir: &Path,
        a: &str,
        b: &str,
    ) -> impl Future<Output = GitResult<Option<Sha>>> + Send;

    /// Lists the parents of every merge commit in `range` (e.g. `base..HEAD`).
    fn merge_commit_parents(
        &self,
        dir: &Path,
        range: &str,
    ) -> impl Future<Output = GitResult<Vec<Vec<Sha>>>> + Send;

    /// Returns the commit HEAD points at.
    fn head_commit(&self, dir: &Path) -> impl Future<Output = GitResult<Sha>> + Send;

    /// Returns the commit `refs/remotes/origin/<branch>` points at.
    fn ref_commit(&self, dir: &Path, branch: &str) -> impl Future<Output = GitResult<Sha>> + Send;

    /// Rebases the checked-out branch onto `onto`.
    fn rebase(&self, dir: &Path, onto: &Sha) -> impl Future<Output = GitResult<()>> + Send;

    /// Pushes the checked-out branch to `origin/<branch>`.
    fn push(
        &self,
        dir: &Path,
        branch: &str,
        force: bool,
    ) -> impl Future<Output = GitResult<()>> + Send;
}

/// Returns the remote-tracking ref the base branch is fetched into.
pub fn remote_ref(branch: &str) -> String {
    format!("refs/remotes/origin/{branch}")
}

/// [`RepoDriver`] backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    identity: CommitIdentity,
}

impl GitCli {
    /// Builds a git command with a clean environment and the commit identity
    /// passed via `-c`, so neither system nor user config leaks in.
    fn command(&self, workdir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("git");
        cmd.current_dir(workdir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_TERMINAL_PROMPT", "0")
            .arg("-c")
            .arg(format!("user.name={}", self.identity.name))
            .arg("-c")
            .arg(format!("user.email={}", self.identity.email))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Runs git and returns trimmed stdout on success.
    async fn run(&self, workdir: &Path, args: &[&str]) -> GitResult<String> {
        let command = describe(args);
        debug!(%command, "executing");

        let output = self.command(workdir).args(args).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn rev_parse(&self, dir: &Path, rev: &str) -> GitResult<Sha> {
        let out = self.run(dir, &["rev-parse", "--verify", rev]).await?;
        Sha::parse(&out).map_err(|_| GitError::InvalidSha(out))
    }
}

/// Renders a git invocation for logs and errors. Clone commands carry the
/// remote URL, which may embed a token, so only the subcommand is shown.
fn describe(args: &[&str]) -> String {
    if args.contains(&"clone") {
        "git clone".to_string()
    } else {
        format!("git {}", args.join(" "))
    }
}

/// Parses `git rev-list --parents` output into the parent lists of merge commits.
fn parse_merge_parents(output: &str) -> GitResult<Vec<Vec<Sha>>> {
    let mut merges = Vec::new();
    for line in output.lines() {
        let parents: Vec<&str> = line.split_whitespace().skip(1).collect();
        if parents.len() > 1 {
            let parents = parents
                .into_iter()
                .map(|p| Sha::parse(p).map_err(|_| GitError::InvalidSha(p.to_string())))
                .collect::<GitResult<Vec<_>>>()?;
            merges.push(parents);
        }
    }
    Ok(merges)
}

impl RepoDriver for GitCli {
    async fn clone_branch(&self, url: &str, dir: &Path, branch: &str, depth: u32) -> GitResult<()> {
        let parent = dir.parent().unwrap_or(Path::new("."));
        let dest = dir.to_string_lossy();
        let depth = depth.to_string();
        self.run(
            parent,
            &[
                "clone",
                "--quiet",
                "--shallow-submodules",
                "--branch",
                branch,
                "--depth",
                &depth,
                url,
                &dest,
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch(&self, dir: &Path, branch: &str, depth: u32) -> GitResult<()> {
        let refspec = format!("{branch}:{}", remote_ref(branch));
        let depth = depth.to_string();
        self.run(
            dir,
            &["fetch", "--quiet", "--depth", &depth, "origin", &refspec],
        )
        .await?;
        Ok(())
    }

    async fn deepen(&self, dir: &Path, depth: u32) -> GitResult<()> {
        let depth = depth.to_string();
        self.run(dir, &["fetch", "--quiet", "--deepen", &depth])
            .await?;
        Ok(())
    }

    async fn merge_base(&self, dir: &Path, a: &str, b: &str) -> GitResult<Option<Sha>> {
        match self.run(dir, &["merge-base", a, b]).await {
            Ok(out) => Sha::parse(&out)
                .map(Some)
                .map_err(|_| GitError::InvalidSha(out)),
            // Exit 1 = no common ancestor in the local history
            Err(GitError::CommandFailed { code: Some(1), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn merge_commit_parents(&self, dir: &Path, range: &str) -> GitResult<Vec<Vec<Sha>>> {
        let out = self.run(dir, &["rev-list", "--parents", range]).await?;
        parse_merge_parents(&out)
    }

    async fn head_commit(&self, dir: &Path) -> GitResult<Sha> {
        self.rev_parse(dir, "HEAD").await
    }

    async fn ref_commit(&self, dir: &Path, branch: &str) -> GitResult<Sha> {
        self.rev_parse(dir, &remote_ref(branch)).await
    }

    async fn rebase(&self, dir: &Path, onto: &Sha) -> GitResult<()> {
        self.run(dir, &["rebase", "--quiet", "--autosquash", onto.as_str()])
            .await?;
        Ok(())
    }

    async fn push(&self, dir: &Path, branch: &str, force: bool) -> GitResult<()> {
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force-with-lease");
        }
        args.extend(["origin", branch]);
        self.run(dir, &args).await?;
        Ok(())
    }
}

/// A temporary directory holding one clone for one update attempt.
///
/// The directory and everything in it is removed when the value is dropped,
/// whichever way the attempt ends.
#[derive(Debug)]
pub struct WorkingCopy {
    _root: TempDir,
    path: PathBuf,
}

impl WorkingCopy {
    /// Creates an empty temp directory. The clone goes into [`WorkingCopy::path`].
    pub fn create() -> GitResult<Self> {
        let root = tempfile::Builder::new().prefix("automerge-").tempdir()?;
        let path = root.path().join("repo");
        Ok(Self { _root: root, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
