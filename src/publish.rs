//! Best-effort publishing of a verified workspace: branch, commit, push, pull request.
//!
//! None of these steps can change the verdict of a build. The chain stops at
//! the first failed step and the failure is recorded in [`PublishOutcome`].

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use crate::git::GitRepo;

/// Result of a single publish step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStep {
    pub success: bool,
    /// Commit hash or PR URL, when the step produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishStep {
    pub fn ok(value: Option<String>) -> Self {
        Self {
            success: true,
            value,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }

    fn from_result(result: anyhow::Result<Option<String>>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failed(format!("{:#}", e)),
        }
    }
}

/// What the publish phase managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub pushed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    /// Name of the step that failed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_step.is_none() && self.pr_url.is_some()
    }
}

/// Source-control collaborator used by the publish phase.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn create_branch(&self, workspace: &Path, branch: &str) -> PublishStep;
    async fn commit(&self, workspace: &Path, message: &str) -> PublishStep;
    async fn push(&self, workspace: &Path, branch: &str) -> PublishStep;
    async fn create_pull_request(
        &self,
        workspace: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> PublishStep;
}

/// Run branch → commit → push → pull request, stopping at the first failure.
pub async fn publish_workspace(
    publisher: &dyn Publisher,
    workspace: &Path,
    branch: &str,
    title: &str,
    body: &str,
) -> PublishOutcome {
    let mut outcome = PublishOutcome {
        branch: branch.to_string(),
        ..Default::default()
    };

    let step = publisher.create_branch(workspace, branch).await;
    if !record_failure(&mut outcome, "create_branch", &step) {
        return outcome;
    }

    let step = publisher.commit(workspace, title).await;
    if !record_failure(&mut outcome, "commit", &step) {
        return outcome;
    }
    outcome.commit = step.value;

    let step = publisher.push(workspace, branch).await;
    if !record_failure(&mut outcome, "push", &step) {
        return outcome;
    }
    outcome.pushed = true;

    let step = publisher
        .create_pull_request(workspace, branch, title, body)
        .await;
    if !record_failure(&mut outcome, "create_pull_request", &step) {
        return outcome;
    }
    outcome.pr_url = step.value;

    info!(branch, pr_url = ?outcome.pr_url, "Published workspace");
    outcome
}

/// Returns whether the chain may continue.
fn record_failure(outcome: &mut PublishOutcome, name: &str, step: &PublishStep) -> bool {
    if step.success {
        return true;
    }
    let error = step.error.clone().unwrap_or_else(|| "unknown error".to_string());
    warn!(step = name, error = %error, "Publish step failed; build result unchanged");
    outcome.failed_step = Some(name.to_string());
    outcome.error = Some(error);
    false
}

/// Publisher backed by the `git` and `gh` CLIs.
///
/// Fresh workspaces have no remote. When a `repository` is configured the
/// remote is added on branch creation and `gh` is pointed at it explicitly.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    remote: String,
    base_branch: String,
    repository: Option<String>,
}

impl GitPublisher {
    pub fn new(remote: impl Into<String>, base_branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            base_branch: base_branch.into(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: Option<String>) -> Self {
        self.repository = repository.filter(|r| !r.trim().is_empty());
        self
    }
}

/// `owner/repo` shorthand becomes a GitHub HTTPS URL; anything else is used as given.
fn remote_url(repository: &str) -> String {
    let repository = repository.trim();
    let is_shorthand = repository.split('/').count() == 2
        && !repository.contains(':')
        && !repository.starts_with('.')
        && !repository.starts_with('/');
    if is_shorthand {
        format!("https://github.com/{}.git", repository)
    } else {
        repository.to_string()
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn create_branch(&self, workspace: &Path, branch: &str) -> PublishStep {
        let result = async {
            let repo = GitRepo::init(workspace)?;
            if let Some(repository) = &self.repository {
                repo.ensure_remote(&self.remote, &remote_url(repository))?;
            }
            repo.checkout_new_branch(branch).await?;
            Ok::<_, anyhow::Error>(None)
        }
        .await;
        PublishStep::from_result(result)
    }

    async fn commit(&self, workspace: &Path, message: &str) -> PublishStep {
        let result = GitRepo::open(workspace)
            .and_then(|repo| repo.snapshot(message))
            .map(Some);
        PublishStep::from_result(result)
    }

    async fn push(&self, workspace: &Path, branch: &str) -> PublishStep {
        let result = async {
            GitRepo::open(workspace)?.push(&self.remote, branch).await?;
            Ok::<_, anyhow::Error>(None)
        }
        .await;
        PublishStep::from_result(result)
    }

    async fn create_pull_request(
        &self,
        workspace: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> PublishStep {
        let result = async {
            let mut gh = Command::new("gh");
            gh.args([
                "pr",
                "create",
                "--title",
                title,
                "--body",
                body,
                "--base",
                &self.base_branch,
                "--head",
                branch,
            ]);
            if let Some(repository) = &self.repository {
                gh.args(["--repo", repository]);
            }
            let output = gh
                .current_dir(workspace)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .context("Failed to run gh pr create")?;

            if !output.status.success() {
                anyhow::bail!(
                    "Failed to create PR: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            let pr_url = String::from_utf8(output.stdout)
                .context("Invalid UTF-8 in gh output")?
                .trim()
                .to_string();
            Ok::<_, anyhow::Error>(Some(pr_url))
        }
        .await;
        PublishStep::from_result(result)
    }
}
