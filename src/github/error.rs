//! GitHub API error types.
//!
//! The merge path has to tell a few kinds of rejection apart:
//!
//! - **ReviewRequired**: branch protection wants more reviews. Retrying won't help.
//! - **RateLimited**: the token ran out of API budget. Retrying within the
//!   run's budget won't help either.
//! - **NotFound**: the PR, branch or repository doesn't exist (or the token
//!   can't see it). Cleanup after a merge treats this as already done.
//! - **Other**: everything else, including GitHub's transient "not mergeable
//!   yet" answers while it recomputes the PR state.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error, categorized for merge decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    ReviewRequired,
    RateLimited,
    NotFound,
    Other,
}

impl GitHubErrorKind {
    /// Returns true if a merge attempt failing this way should not be retried.
    pub fn is_permanent_merge_rejection(&self) -> bool {
        matches!(
            self,
            GitHubErrorKind::ReviewRequired | GitHubErrorKind::RateLimited
        )
    }
}

/// A GitHub API error.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// GitHub's message, or a description of what went wrong locally.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates an error without an octocrab source, classifying it by status
    /// and message.
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify(status_code, &message),
            status_code,
            message,
            source: None,
        }
    }

    /// Creates an error for a response body that could not be understood.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Other,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let (status_code, message) = match &err {
            octocrab::Error::GitHub { source, .. } => {
                (Some(source.status_code.as_u16()), source.message.clone())
            }
            other => (None, other.to_string()),
        };

        Self {
            kind: classify(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == GitHubErrorKind::NotFound
    }
}

impl From<octocrab::Error> for GitHubApiError {
    fn from(err: octocrab::Error) -> Self {
        Self::from_octocrab(err)
    }
}

fn classify(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    if is_review_required(message) {
        GitHubErrorKind::ReviewRequired
    } else if status_code == Some(429) || is_rate_limit_error(message) {
        GitHubErrorKind::RateLimited
    } else if status_code == Some(404) {
        GitHubErrorKind::NotFound
    } else {
        GitHubErrorKind::Other
    }
}

/// Checks if a merge was rejected because branch protection wants reviews.
fn is_review_required(message: &str) -> bool {
    message.contains("review is required by reviewers with write access")
        || message.contains("reviews are required by reviewers with write access")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("api rate limit exceeded")
        || message_lower.contains("secondary rate limit")
        || message_lower.contains("abuse detection")
}
