//! Core domain types for the automerge bot.

pub mod ids;
pub mod pr;

pub use ids::{InvalidSha, PrNumber, RepoId, Sha};
pub use pr::{BranchRef, MergeMethod, MergeableState, PrState, PullRequestRef, SkipReason};
