// ABOUTME: Source-control collaborator: clone tokens, checkouts, commit statuses and PR comments.
// ABOUTME: GitCli shells out to git; status and comment reporting is logged.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::types::DeploymentId;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("git checkout of {commit} failed: {message}")]
    CheckoutFailed { commit: String, message: String },

    #[error("no clone token available for installation {0}")]
    MissingToken(String),

    #[error("source report failed: {0}")]
    ReportFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub url: String,
    pub branch: String,
    /// Specific commit to check out; branch head when absent.
    pub commit: Option<String>,
    pub token: Option<String>,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub dir: PathBuf,
    pub commit_sha: String,
    pub commit_message: Option<String>,
}

impl Checkout {
    /// Seven-character form used in image tags and the deployment row.
    pub fn short_sha(&self) -> &str {
        let end = self.commit_sha.len().min(7);
        &self.commit_sha[..end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub repository: String,
    pub commit_sha: String,
    pub deployment_id: DeploymentId,
    pub state: CommitState,
    pub description: String,
}

/// Deployment summary for the pull request whose head is `branch`.
#[derive(Debug, Clone)]
pub struct PullRequestComment {
    pub repository: String,
    pub branch: String,
    pub commit_sha: String,
    pub deployment_id: DeploymentId,
    pub state: CommitState,
    pub body: String,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short-lived token for cloning a private repository.
    async fn clone_token(&self, installation: &str) -> Result<Option<String>, SourceError>;

    async fn checkout(&self, request: &CheckoutRequest) -> Result<Checkout, SourceError>;

    /// Publish the deployment state on the commit.
    async fn report_status(&self, report: &StatusReport) -> Result<(), SourceError>;

    /// Create or update the deployment comment on the open pull request for
    /// the branch. Branches without one are skipped.
    async fn comment_on_pull_request(&self, comment: &PullRequestComment)
    -> Result<(), SourceError>;
}

/// `git` on the PATH, with tokens configured per installation.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    tokens: HashMap<String, String>,
}

impl GitCli {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl SourceProvider for GitCli {
    async fn clone_token(&self, installation: &str) -> Result<Option<String>, SourceError> {
        self.tokens
            .get(installation)
            .cloned()
            .map(Some)
            .ok_or_else(|| SourceError::MissingToken(installation.to_string()))
    }

    async fn checkout(&self, request: &CheckoutRequest) -> Result<Checkout, SourceError> {
        if let Some(parent) = request.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = authenticated_url(&request.url, request.token.as_deref());

        let mut clone = Command::new("git");
        clone.arg("clone").arg("--single-branch").arg("--branch").arg(&request.branch);
        if request.commit.is_none() {
            clone.arg("--depth").arg("1");
        }
        clone.arg(&url).arg(&request.dest);
        info!(repo = %request.url, branch = %request.branch, "cloning repository");
        run_git(&mut clone)
            .await
            .map_err(|message| SourceError::CloneFailed(redact(&message, request.token.as_deref())))?;

        if let Some(commit) = &request.commit {
            let mut checkout = Command::new("git");
            checkout
                .arg("-C")
                .arg(&request.dest)
                .arg("checkout")
                .arg("--detach")
                .arg(commit);
            run_git(&mut checkout)
                .await
                .map_err(|message| SourceError::CheckoutFailed {
                    commit: commit.clone(),
                    message,
                })?;
        }

        let commit_sha = git_output(&request.dest, &["rev-parse", "HEAD"]).await?;
        let commit_message = git_output(&request.dest, &["log", "-1", "--pretty=%s"])
            .await
            .ok()
            .filter(|m| !m.is_empty());
        debug!(commit = %commit_sha, "checked out");

        Ok(Checkout {
            dir: request.dest.clone(),
            commit_sha,
            commit_message,
        })
    }

    async fn report_status(&self, report: &StatusReport) -> Result<(), SourceError> {
        info!(
            repository = %report.repository,
            commit = %report.commit_sha,
            deployment_id = %report.deployment_id,
            state = report.state.as_str(),
            description = %report.description,
            "commit status"
        );
        Ok(())
    }

    async fn comment_on_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<(), SourceError> {
        info!(
            repository = %comment.repository,
            branch = %comment.branch,
            commit = %comment.commit_sha,
            deployment_id = %comment.deployment_id,
            state = comment.state.as_str(),
            "pull request comment: {}",
            comment.body
        );
        Ok(())
    }
}

async fn run_git(command: &mut Command) -> Result<(), String> {
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

async fn git_output(dir: &Path, args: &[&str]) -> Result<String, SourceError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        return Err(SourceError::CloneFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Embed a token into an https clone URL.
fn authenticated_url(url: &str, token: Option<&str>) -> String {
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) => format!("https://x-access-token:{token}@{rest}"),
        _ => url.to_string(),
    }
}

fn redact(message: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => message.replace(token, "***"),
        _ => message.to_string(),
    }
}
