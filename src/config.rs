//! Merge and update policy, read from environment variables.
//!
//! Every setting has a default, so an empty environment yields a working
//! policy: merge PRs labelled `automerge` with a merge commit once GitHub says
//! they are mergeable, and keep them up to date by merging the base branch in.

use std::fmt;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::types::MergeMethod;

const DEFAULT_LABELS: &str = "automerge";
const DEFAULT_MERGE_RETRIES: u32 = 6;
const DEFAULT_MERGE_RETRY_SLEEP_MS: u64 = 5000;
const DEFAULT_UPDATE_RETRIES: u32 = 1;
const DEFAULT_UPDATE_RETRY_SLEEP_MS: u64 = 5000;
const DEFAULT_MERGE_BASE_TIMEOUT_SECS: u64 = 60;

/// Invalid configuration, or configuration that cannot be applied to a PR.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a non-negative integer: {value:?}")]
    InvalidInteger { name: &'static str, value: String },

    #[error("{name} is not a merge method (merge, squash, rebase): {value:?}")]
    InvalidMergeMethod { name: &'static str, value: String },

    #[error("UPDATE_METHOD is not an update method (merge, rebase): {0:?}")]
    InvalidUpdateMethod(String),

    #[error("couldn't parse {0:?} as a \"<label>=<method>\" expression")]
    InvalidMethodLabel(String),

    #[error("MERGE_COMMIT_MESSAGE_REGEX is not a valid regex: {pattern:?}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(
        "MERGE_COMMIT_MESSAGE_REGEX must contain exactly one capturing group, found {groups}: {pattern:?}"
    )]
    RegexCaptureGroups { pattern: String, groups: usize },

    #[error("discovered multiple merge method labels, only one is permitted: {labels:?}")]
    MultipleMergeMethodLabels { labels: Vec<String> },

    #[error("commit message template refers to unknown property pullRequest.{path}")]
    UnresolvedTemplatePath { path: String },
}

/// Required and blocking labels, parsed from `label,!blocking-label` lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPolicy {
    /// Every one of these must be present.
    pub required: Vec<String>,
    /// None of these may be present.
    pub blocking: Vec<String>,
}

impl LabelPolicy {
    pub fn parse(s: &str) -> Self {
        let mut policy = LabelPolicy::default();
        for item in s.split(',').map(str::trim) {
            if let Some(blocked) = item.strip_prefix('!') {
                let blocked = blocked.trim();
                if !blocked.is_empty() {
                    policy.blocking.push(blocked.to_string());
                }
            } else if !item.is_empty() {
                policy.required.push(item.to_string());
            }
        }
        policy
    }
}

/// A label that selects a merge method, e.g. `squash-me=squash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLabel {
    pub label: String,
    pub method: MergeMethod,
}

/// How the head branch is brought up to date with the base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMethod {
    /// Merge the base branch into the head branch through the API.
    Merge,
    /// Rebase the head branch onto the base branch locally and force-push.
    Rebase,
}

impl UpdateMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "merge" => Some(UpdateMethod::Merge),
            "rebase" => Some(UpdateMethod::Rebase),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMethod::Merge => f.write_str("merge"),
            UpdateMethod::Rebase => f.write_str("rebase"),
        }
    }
}

/// Where the merge commit title comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitMessage {
    /// Let GitHub choose.
    Automatic,
    PullRequestTitle,
    PullRequestDescription,
    PullRequestTitleAndDescription,
    /// Free text with `{pullRequest.<path>}` placeholders.
    Template(String),
}

impl CommitMessage {
    pub fn parse(s: &str) -> Self {
        match s {
            "" | "automatic" => CommitMessage::Automatic,
            "pull-request-title" => CommitMessage::PullRequestTitle,
            "pull-request-description" => CommitMessage::PullRequestDescription,
            "pull-request-title-and-description" => CommitMessage::PullRequestTitleAndDescription,
            template => CommitMessage::Template(template.to_string()),
        }
    }
}

/// Everything that decides whether, when and how PRs are updated and merged.
#[derive(Debug, Clone)]
pub struct Policy {
    pub merge_labels: LabelPolicy,
    /// Labels removed from a PR after it is merged.
    pub merge_remove_labels: Vec<String>,
    pub merge_method: MergeMethod,
    pub merge_method_labels: Vec<MethodLabel>,
    /// Skip PRs that carry none of the `merge_method_labels`.
    pub merge_method_label_required: bool,
    pub merge_forks: bool,
    pub merge_commit_message: CommitMessage,
    /// Extracts the part of the PR body used in commit messages. Always has
    /// exactly one capture group.
    pub merge_commit_message_regex: Option<Regex>,
    /// Only merge PRs opened by this login.
    pub merge_filter_author: Option<String>,
    /// Distinct approving reviewers needed.
    pub merge_required_approvals: u32,
    pub merge_retry: RetryPolicy,
    pub merge_delete_branch: bool,

    pub update_labels: LabelPolicy,
    pub update_method: UpdateMethod,
    pub update_retry: RetryPolicy,

    /// Wall-clock budget for deepening a shallow clone during rebase updates.
    pub merge_base_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            merge_labels: LabelPolicy::parse(DEFAULT_LABELS),
            merge_remove_labels: Vec::new(),
            merge_method: MergeMethod::Merge,
            merge_method_labels: Vec::new(),
            merge_method_label_required: false,
            merge_forks: true,
            merge_commit_message: CommitMessage::Automatic,
            merge_commit_message_regex: None,
            merge_filter_author: None,
            merge_required_approvals: 0,
            merge_retry: RetryPolicy::new(
                DEFAULT_MERGE_RETRIES,
                Duration::from_millis(DEFAULT_MERGE_RETRY_SLEEP_MS),
            ),
            merge_delete_branch: false,
            update_labels: LabelPolicy::parse(DEFAULT_LABELS),
            update_method: UpdateMethod::Merge,
            update_retry: RetryPolicy::new(
                DEFAULT_UPDATE_RETRIES,
                Duration::from_millis(DEFAULT_UPDATE_RETRY_SLEEP_MS),
            ),
            merge_base_timeout: Duration::from_secs(DEFAULT_MERGE_BASE_TIMEOUT_SECS),
        }
    }
}

impl Policy {
    /// Reads the policy from the process environment.
    pub fn from_process_env() -> Result<Self, ConfigError> {
        Self::from_env(|name| std::env::var(name).ok())
    }

    /// Builds a policy from a variable lookup. Unset and empty variables take
    /// their defaults.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let defaults = Policy::default();

        let merge_labels = var("MERGE_LABELS")
            .map(|v| LabelPolicy::parse(&v))
            .unwrap_or(defaults.merge_labels);
        let merge_remove_labels = var("MERGE_REMOVE_LABELS")
            .map(|v| parse_list(&v))
            .unwrap_or_default();
        let merge_method = match var("MERGE_METHOD") {
            Some(v) => parse_merge_method("MERGE_METHOD", &v)?,
            None => defaults.merge_method,
        };
        let merge_method_labels = match var("MERGE_METHOD_LABELS") {
            Some(v) => parse_method_labels(&v)?,
            None => Vec::new(),
        };
        let merge_commit_message_regex = match var("MERGE_COMMIT_MESSAGE_REGEX") {
            Some(v) => Some(compile_body_regex(&v)?),
            None => None,
        };

        let merge_retry = RetryPolicy::new(
            parse_u32(&var, "MERGE_RETRIES", DEFAULT_MERGE_RETRIES)?,
            Duration::from_millis(parse_u64(
                &var,
                "MERGE_RETRY_SLEEP",
                DEFAULT_MERGE_RETRY_SLEEP_MS,
            )?),
        );
        let update_retry = RetryPolicy::new(
            parse_u32(&var, "UPDATE_RETRIES", DEFAULT_UPDATE_RETRIES)?,
            Duration::from_millis(parse_u64(
                &var,
                "UPDATE_RETRY_SLEEP",
                DEFAULT_UPDATE_RETRY_SLEEP_MS,
            )?),
        );

        let update_method = match var("UPDATE_METHOD") {
            Some(v) => UpdateMethod::parse(&v).ok_or(ConfigError::InvalidUpdateMethod(v))?,
            None => defaults.update_method,
        };

        Ok(Policy {
            merge_labels,
            merge_remove_labels,
            merge_method,
            merge_method_labels,
            merge_method_label_required: var("MERGE_METHOD_LABEL_REQUIRED").as_deref()
                == Some("true"),
            merge_forks: var("MERGE_FORKS").as_deref() != Some("false"),
            merge_commit_message: var("MERGE_COMMIT_MESSAGE")
                .map(|v| CommitMessage::parse(&v))
                .unwrap_or(CommitMessage::Automatic),
            merge_commit_message_regex,
            merge_filter_author: var("MERGE_FILTER_AUTHOR"),
            merge_required_approvals: parse_u32(&var, "MERGE_REQUIRED_APPROVALS", 0)?,
            merge_retry,
            merge_delete_branch: var("MERGE_DELETE_BRANCH").as_deref() == Some("true"),
            update_labels: var("UPDATE_LABELS")
                .map(|v| LabelPolicy::parse(&v))
                .unwrap_or(defaults.update_labels),
            update_method,
            update_retry,
            merge_base_timeout: defaults.merge_base_timeout,
        })
    }
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_merge_method(name: &'static str, value: &str) -> Result<MergeMethod, ConfigError> {
    MergeMethod::parse(value).ok_or_else(|| ConfigError::InvalidMergeMethod {
        name,
        value: value.to_string(),
    })
}

fn parse_method_labels(s: &str) -> Result<Vec<MethodLabel>, ConfigError> {
    s.split(',')
        .map(|entry| {
            let (label, method) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidMethodLabel(entry.to_string()))?;
            let label = label.trim();
            if label.is_empty() || method.trim().is_empty() {
                return Err(ConfigError::InvalidMethodLabel(entry.to_string()));
            }
            Ok(MethodLabel {
                label: label.to_string(),
                method: parse_merge_method("MERGE_METHOD_LABELS", method)?,
            })
        })
        .collect()
}

/// Compiles the body-extraction regex with `.` matching newlines and `^`/`$`
/// matching at line boundaries.
fn compile_body_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let regex = RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
        .map_err(|source| ConfigError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;

    // captures_len counts the implicit whole-match group
    let groups = regex.captures_len() - 1;
    if groups != 1 {
        return Err(ConfigError::RegexCaptureGroups {
            pattern: pattern.to_string(),
            groups,
        });
    }
    Ok(regex)
}

fn parse_u64<V>(var: &V, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidInteger { name, value }),
    }
}

fn parse_u32<V>(var: &V, name: &'static str, default: u32) -> Result<u32, ConfigError>
where
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidInteger { name, value }),
    }
}
