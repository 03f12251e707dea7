//! Top-level error type for the update and merge flows.

use thiserror::Error;

use crate::config::ConfigError;
use crate::git::GitError;
use crate::github::GitHubApiError;

#[derive(Debug, Error)]
pub enum Error {
    /// The policy, or a PR's labels, can't be acted on as configured.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubApiError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
