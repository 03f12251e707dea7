//! Merge commit titles.
//!
//! The title is derived from the PR according to [`CommitMessage`], after the
//! PR body has optionally been narrowed down by the body-extraction regex.
//! Templates reference PR properties by their GitHub REST names, e.g.
//! `{pullRequest.title} (#{pullRequest.number})` or `{pullRequest.head.ref}`.

use regex::Regex;
use serde_json::{Value, json};

use crate::config::{CommitMessage, ConfigError};
use crate::types::PullRequestRef;

const PLACEHOLDER_START: &str = "{pullRequest.";

/// Applies the body-extraction regex: if it matches, the trimmed capture
/// replaces the body. A body the regex doesn't match is returned unchanged.
pub fn extract_body(regex: Option<&Regex>, body: Option<&str>) -> Option<String> {
    let body = body?;
    let Some(regex) = regex else {
        return Some(body.to_string());
    };
    match regex.captures(body).and_then(|caps| caps.get(1)) {
        Some(m) => Some(m.as_str().trim().to_string()),
        None => Some(body.to_string()),
    }
}

/// Builds the merge commit title. `None` leaves the choice to GitHub.
///
/// `body` is the (possibly extracted) body to use instead of `pr.body`.
pub fn commit_title(
    strategy: &CommitMessage,
    pr: &PullRequestRef,
    body: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    let title = match strategy {
        CommitMessage::Automatic => None,
        CommitMessage::PullRequestTitle => Some(pr.title.clone()),
        CommitMessage::PullRequestDescription => body.map(String::from),
        CommitMessage::PullRequestTitleAndDescription => {
            Some(format!("{}\n\n{}", pr.title, body.unwrap_or_default()))
        }
        CommitMessage::Template(template) => Some(render(template, &pr_view(pr, body))?),
    };
    Ok(title)
}

/// The PR as a JSON document shaped like GitHub's REST representation, for
/// template lookups.
fn pr_view(pr: &PullRequestRef, body: Option<&str>) -> Value {
    let branch = |b: &crate::types::BranchRef| {
        json!({
            "ref": b.name,
            "sha": b.sha.as_str(),
            "repo": b.repo.as_ref().map(|r| json!({
                "full_name": r.full_name(),
                "name": r.repo,
                "owner": { "login": r.owner },
            })),
        })
    };
    json!({
        "number": pr.number.0,
        "title": pr.title,
        "body": body,
        "state": if pr.state.is_open() { "open" } else { "closed" },
        "merged": pr.state.is_merged(),
        "mergeable_state": pr.mergeable_state.as_ref().map(|s| s.as_str()),
        "commits": pr.commits,
        "user": pr.author.as_ref().map(|login| json!({ "login": login })),
        "labels": pr.labels.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
        "head": branch(&pr.head),
        "base": branch(&pr.base),
    })
}

/// Substitutes every `{pullRequest.<path>}` in `template`.
fn render(template: &str, view: &Value) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(PLACEHOLDER_START) {
        let after = &rest[start + PLACEHOLDER_START.len()..];
        let Some(end) = after.find('}') else { break };
        let path = &after[..end];
        if path.is_empty() {
            out.push_str(&rest[..start + PLACEHOLDER_START.len()]);
            rest = after;
            continue;
        }
        out.push_str(&rest[..start]);
        let value = resolve(view, path).ok_or_else(|| ConfigError::UnresolvedTemplatePath {
            path: path.to_string(),
        })?;
        out.push_str(&display(value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Follows a property path like `head.repo.owner.login` or `labels[0].name`.
fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        let (key, indices) = match segment.find('[') {
            Some(i) => (&segment[..i], &segment[i..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        let mut indices = indices;
        while let Some(stripped) = indices.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].trim().parse().ok()?;
            current = current.as_array()?.get(index)?;
            indices = &stripped[close + 1..];
        }
        if !indices.is_empty() {
            return None;
        }
    }
    Some(current)
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
