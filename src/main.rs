use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use automerge_bot::config::{ConfigError, Policy};
use automerge_bot::git::GitCli;
use automerge_bot::github::{OctocrabClient, PullRequestService};
use automerge_bot::merge::MergeOutcome;
use automerge_bot::runner::Runner;
use automerge_bot::types::{PrNumber, RepoId};

const URL_PATTERN: &str = r"^https://github.com/([^/]+)/([^/]+)/(pull|tree)/([^ ]+)$";

const EXIT_NEUTRAL: u8 = 78;
const EXIT_FAILURE: u8 = 1;
const EXIT_CLIENT_ERROR: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "automerge-bot", version)]
#[command(about = "Update and merge a pull request, or update the PRs targeting a branch")]
struct Cli {
    /// Log at debug level
    #[arg(long, conflicts_with = "trace")]
    debug: bool,

    /// Log at trace level
    #[arg(long)]
    trace: bool,

    /// Token used for the GitHub API and for pushing
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// https://github.com/<owner>/<repo>/pull/<n> or https://github.com/<owner>/<repo>/tree/<branch>
    url: String,
}

/// A problem with how the bot was invoked.
#[derive(Debug, Error)]
#[error("{0}")]
struct ClientError(String);

#[derive(Debug, PartialEq, Eq)]
enum Target {
    PullRequest { repo: RepoId, number: PrNumber },
    Branch { repo: RepoId, branch: String },
}

fn parse_target(url: &str) -> anyhow::Result<Target> {
    let pattern = Regex::new(URL_PATTERN)?;
    let invalid = || ClientError(format!("invalid URL: {url}"));
    let caps = pattern.captures(url).ok_or_else(invalid)?;
    let repo = RepoId::new(&caps[1], &caps[2]);
    match &caps[3] {
        "pull" => {
            let number = caps[4].parse::<u64>().map_err(|_| invalid())?;
            Ok(Target::PullRequest {
                repo,
                number: PrNumber(number),
            })
        }
        _ => Ok(Target::Branch {
            repo,
            branch: caps[4].to_string(),
        }),
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.trace {
        EnvFilter::new("automerge_bot=trace,octocrab=debug")
    } else if cli.debug {
        EnvFilter::new("automerge_bot=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "automerge_bot=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn merge_exit_code(outcome: Option<&MergeOutcome>) -> u8 {
    match outcome {
        None | Some(MergeOutcome::Merged) => 0,
        Some(MergeOutcome::Skipped(_)) | Some(MergeOutcome::AuthorFiltered) => EXIT_NEUTRAL,
        Some(MergeOutcome::NotReady) | Some(MergeOutcome::MergeFailed) => EXIT_FAILURE,
    }
}

fn error_exit_code(err: &anyhow::Error) -> u8 {
    let client_error = err.downcast_ref::<ClientError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
        || matches!(
            err.downcast_ref::<automerge_bot::Error>(),
            Some(automerge_bot::Error::Config(_))
        );
    if client_error {
        EXIT_CLIENT_ERROR
    } else {
        EXIT_FAILURE
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let target = parse_target(&cli.url)?;
    let token = cli
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ClientError("missing GITHUB_TOKEN".to_string()))?;
    let policy = Policy::from_process_env()?;

    let client = OctocrabClient::from_token(token).context("failed to build GitHub client")?;
    let runner = Runner::new(client, GitCli::default(), policy);

    match target {
        Target::PullRequest { repo, number } => {
            info!(%repo, pr = %number, "processing pull request");
            let pr = runner.service().get_pr(&repo, number).await?;
            let report = runner.process_pull_request(&pr).await?;
            Ok(merge_exit_code(report.merge.as_ref()))
        }
        Target::Branch { repo, branch } => {
            info!(%repo, %branch, "updating pull requests for branch");
            let summary = runner.process_branch_update(&repo, &branch).await?;
            info!(
                processed = summary.processed.len(),
                failed = summary.failed.len(),
                "branch update finished"
            );
            Ok(if summary.is_success() { 0 } else { EXIT_FAILURE })
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(error_exit_code(&e))
        }
    }
}
