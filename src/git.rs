//! Git plumbing for workspaces.
//!
//! Local repository state (init, snapshot commits) goes through `git2`.
//! Branch switching, cross-repository fetch, merges and pushes shell out to
//! the `git` CLI, which handles working-tree updates and conflict aborts.

use anyhow::{Context, Result};
use git2::{Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::audit::AUDIT_FILE_NAME;

/// Paths kept out of every snapshot.
const EXCLUDED_PATHS: &[&str] = &[AUDIT_FILE_NAME, "node_modules/"];

const COMMITTER_NAME: &str = "kiln";
const COMMITTER_EMAIL: &str = "kiln@localhost";

/// A git repository rooted at a workspace.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

impl GitRepo {
    /// Open the repository at `path`, initialising it first if needed.
    pub fn init(path: &Path) -> Result<Self> {
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => Repository::init(path).with_context(|| {
                format!("Failed to initialise git repository at {}", path.display())
            })?,
        };

        let mut config = repo.config().context("Failed to read git config")?;
        if config.get_string("user.name").is_err() {
            config.set_str("user.name", COMMITTER_NAME)?;
        }
        if config.get_string("user.email").is_err() {
            config.set_str("user.email", COMMITTER_EMAIL)?;
        }

        let exclude = repo.path().join("info").join("exclude");
        if let Some(parent) = exclude.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = fs::read_to_string(&exclude).unwrap_or_default();
        let mut changed = false;
        for pattern in EXCLUDED_PATHS {
            if !contents.lines().any(|line| line.trim() == *pattern) {
                if !contents.is_empty() && !contents.ends_with('\n') {
                    contents.push('\n');
                }
                contents.push_str(pattern);
                contents.push('\n');
                changed = true;
            }
        }
        if changed {
            fs::write(&exclude, contents)
                .with_context(|| format!("Failed to write {}", exclude.display()))?;
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Repository::open(path)
            .with_context(|| format!("Failed to open git repository at {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Repository::open(&self.path).context("Failed to open git repository")
    }

    /// Stage everything and commit it. Returns the new commit hash.
    pub fn snapshot(&self, message: &str) -> Result<String> {
        let repo = self.repo()?;
        let mut index = repo.index()?;

        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = Signature::now(COMMITTER_NAME, COMMITTER_EMAIL)?;

        // Unborn branch: first commit has no parent
        let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        let commit_id = match &parent {
            Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[parent])?,
            None => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
        };

        debug!(commit = %commit_id, repo = %self.path.display(), "Snapshot committed");
        Ok(commit_id.to_string())
    }

    /// `git checkout -b <branch>`
    pub async fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        let output = self.git(&["checkout", "-b", branch]).await?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to create branch {}: {}",
                branch,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Fetch `branch` from the repository at `source` into a local branch of the same name.
    pub async fn fetch_branch(&self, source: &Path, branch: &str) -> Result<()> {
        let source = source.to_string_lossy();
        let refspec = format!("{}:{}", branch, branch);
        let output = self.git(&["fetch", &source, &refspec]).await?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to fetch {} from {}: {}",
                branch,
                source,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Merge `branch` into the current branch with `--no-ff`.
    ///
    /// Returns `Ok(false)` when the merge conflicted and was aborted, leaving
    /// the working tree as it was before the merge.
    pub async fn merge_no_ff(&self, branch: &str) -> Result<bool> {
        let message = format!("Merge {}", branch);
        let output = self
            .git(&["merge", "--no-ff", "-m", &message, branch])
            .await?;

        if output.status.success() {
            return Ok(true);
        }

        warn!(
            branch,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Merge failed, aborting"
        );
        match self.git(&["merge", "--abort"]).await {
            Ok(abort) if !abort.status.success() => warn!(
                branch,
                stderr = %String::from_utf8_lossy(&abort.stderr).trim(),
                "merge --abort failed"
            ),
            Err(e) => warn!(branch, error = %e, "merge --abort failed"),
            Ok(_) => {}
        }
        Ok(false)
    }

    /// `git push -u <remote> <branch>`
    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let output = self.git(&["push", "-u", remote, branch]).await?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to push {} to {}: {}",
                branch,
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Add remote `name` pointing at `url` unless a remote of that name exists.
    /// Returns whether the remote was added.
    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<bool> {
        let repo = self.repo()?;
        if repo.find_remote(name).is_ok() {
            return Ok(false);
        }
        repo.remote(name, url)
            .with_context(|| format!("Failed to add remote {} ({})", name, url))?;
        debug!(remote = name, url, "Remote added");
        Ok(true)
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.first().unwrap_or(&"")))
    }
}
