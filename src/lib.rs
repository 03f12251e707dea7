//! Automerge bot - keeps pull request branches up to date with their base
//! branch and merges them once policy and GitHub allow it.
//!
//! The library is split along the two external systems it talks to
//! ([`github`] and [`git`]) and the flows built on top of them ([`update`],
//! [`merge`], [`runner`]).

pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod merge;
pub mod message;
pub mod readiness;
pub mod retry;
pub mod runner;
pub mod types;
pub mod update;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};
