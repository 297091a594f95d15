//! Workspace lifecycle: creation, seeding, cloning for parallel sub-tasks and cleanup.
//!
//! A workspace is a uniquely named directory under a base path. It owns the
//! requirements document (written exactly once), the audit ledger and every
//! file the agent produces. Workspaces are never reused across runs.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::audit::AUDIT_FILE_NAME;
use crate::util::slugify;

/// Well-known name of the static requirements document.
pub const REQUIREMENTS_FILE: &str = "REQUIREMENTS.md";

/// Supporting-tooling directory copied from the template (scripts, default settings).
pub const SUPPORT_DIR: &str = ".claude";

/// Template subdirectory holding project scaffolding shared by parallel sub-tasks.
pub const SCAFFOLD_DIR: &str = "scaffold";

/// Directories never copied into a sub-workspace.
const CLONE_SKIP_DIRS: &[&str] = &["node_modules"];

const MAX_SLUG_LEN: usize = 40;

/// An isolated working directory for one build run or sub-task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.root.join(REQUIREMENTS_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILE_NAME)
    }
}

/// Creates and tears down workspaces under a base path.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_path: PathBuf,
    template_dir: Option<PathBuf>,
}

impl WorkspaceManager {
    pub fn new(base_path: impl Into<PathBuf>, template_dir: Option<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            template_dir,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create a fresh workspace and write the requirements document into it.
    ///
    /// Directory creation and the requirements write are fatal. Copying the
    /// optional supporting-tooling directory is not: failures are logged.
    pub fn create(&self, package_name: &str, requirements: &str) -> Result<Workspace> {
        fs::create_dir_all(&self.base_path).with_context(|| {
            format!("Failed to create base path {}", self.base_path.display())
        })?;

        let root = self.base_path.join(workspace_dir_name(package_name));
        // create_dir on the leaf so a name collision fails instead of reusing a directory
        fs::create_dir(&root)
            .with_context(|| format!("Failed to create workspace {}", root.display()))?;
        let workspace = Workspace { root };

        write_requirements(&workspace, requirements)?;

        if let Some(template) = &self.template_dir {
            let src = template.join(SUPPORT_DIR);
            if src.is_dir() {
                match copy_tree(&src, &workspace.path().join(SUPPORT_DIR), &[]) {
                    Ok(count) => debug!(files = count, "Copied supporting tooling"),
                    Err(e) => warn!(
                        error = %e,
                        template = %src.display(),
                        "Failed to copy supporting tooling; continuing without it"
                    ),
                }
            }
        }

        info!(workspace = %workspace.path().display(), "Workspace created");
        Ok(workspace)
    }

    /// Copy the template's shared scaffolding into the workspace root.
    ///
    /// Returns the number of files copied; zero when no template is configured.
    pub fn seed_scaffolding(&self, workspace: &Workspace) -> Result<usize> {
        let Some(template) = &self.template_dir else {
            return Ok(0);
        };
        let src = template.join(SCAFFOLD_DIR);
        if !src.is_dir() {
            debug!(template = %src.display(), "No scaffolding directory in template");
            return Ok(0);
        }
        copy_tree(&src, workspace.path(), &[REQUIREMENTS_FILE, AUDIT_FILE_NAME])
    }

    /// Create an isolated full copy of `base` for one sub-task.
    ///
    /// The copy lives next to the base as `<base-name>--<index>-<slug(label)>`
    /// and excludes the audit ledger, since only the base workspace is audited.
    /// The index keeps labels that slug identically (`feat/auth`, `feat-auth`)
    /// apart.
    pub fn clone_workspace(
        &self,
        base: &Workspace,
        index: usize,
        label: &str,
    ) -> Result<Workspace> {
        let root = self.base_path.join(format!(
            "{}--{}-{}",
            base.name(),
            index,
            slugify(label, MAX_SLUG_LEN)
        ));
        fs::create_dir(&root)
            .with_context(|| format!("Failed to create sub-workspace {}", root.display()))?;

        let mut skip: Vec<&str> = CLONE_SKIP_DIRS.to_vec();
        skip.push(AUDIT_FILE_NAME);
        let count = copy_tree(base.path(), &root, &skip)?;
        debug!(sub_workspace = %root.display(), files = count, "Sub-workspace cloned");

        Ok(Workspace { root })
    }

    /// Remove a workspace directory and everything in it.
    pub fn remove(&self, workspace: &Workspace) -> Result<()> {
        fs::remove_dir_all(workspace.path()).with_context(|| {
            format!("Failed to remove workspace {}", workspace.path().display())
        })
    }
}

/// `<slug>-<YYYYmmdd-HHMMSS>-<uuid8>`
fn workspace_dir_name(package_name: &str) -> String {
    let mut slug = slugify(package_name, MAX_SLUG_LEN);
    if slug.is_empty() {
        slug = "package".to_string();
    }
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", slug, Utc::now().format("%Y%m%d-%H%M%S"), &id[..8])
}

fn write_requirements(workspace: &Workspace, requirements: &str) -> Result<()> {
    let path = workspace.requirements_path();
    // create_new: the document is written exactly once per workspace
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(requirements.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Recursively copy `src` into `dst`, skipping top-level entries named in `skip`.
fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> Result<usize> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    let mut copied = 0;
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|entry| {
        !(entry.depth() == 1
            && skip
                .iter()
                .any(|name| entry.file_name().to_string_lossy() == *name))
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("Walked entry outside of source tree")?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(base: &Path, template: Option<&Path>) -> WorkspaceManager {
        WorkspaceManager::new(base.join("workspaces"), template.map(Path::to_path_buf))
    }

    #[test]
    fn create_writes_requirements_once() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let ws = manager.create("Todo API", "# Requirements\n").unwrap();

        assert!(ws.path().is_dir());
        assert!(ws.name().starts_with("todo-api-"));
        assert_eq!(
            fs::read_to_string(ws.requirements_path()).unwrap(),
            "# Requirements\n"
        );
        assert!(write_requirements(&ws, "again").is_err());
    }

    #[test]
    fn create_yields_unique_directories() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let a = manager.create("pkg", "r").unwrap();
        let b = manager.create("pkg", "r").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn create_handles_unsluggable_names() {
        let dir = TempDir::new().unwrap();
        let ws = manager(dir.path(), None).create("!!!", "r").unwrap();
        assert!(ws.name().starts_with("package-"));
    }

    #[test]
    fn create_fails_when_base_path_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("workspaces");
        fs::write(&blocker, "not a dir").unwrap();
        let result = manager(dir.path(), None).create("pkg", "r");
        assert!(result.is_err());
    }

    #[test]
    fn create_copies_supporting_tooling() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(template.join(SUPPORT_DIR).join("scripts")).unwrap();
        fs::write(template.join(SUPPORT_DIR).join("settings.json"), "{}").unwrap();
        fs::write(
            template.join(SUPPORT_DIR).join("scripts").join("check.sh"),
            "#!/bin/sh",
        )
        .unwrap();

        let ws = manager(dir.path(), Some(&template))
            .create("pkg", "r")
            .unwrap();
        assert!(ws.path().join(".claude/settings.json").is_file());
        assert!(ws.path().join(".claude/scripts/check.sh").is_file());
    }

    #[test]
    fn missing_template_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let ws = manager(dir.path(), Some(&dir.path().join("nope")))
            .create("pkg", "r")
            .unwrap();
        assert!(!ws.path().join(SUPPORT_DIR).exists());
    }

    #[test]
    fn seed_scaffolding_copies_template_scaffold() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("template");
        fs::create_dir_all(template.join(SCAFFOLD_DIR).join("src")).unwrap();
        fs::write(template.join(SCAFFOLD_DIR).join("package.json"), "{}").unwrap();
        fs::write(template.join(SCAFFOLD_DIR).join("src/index.ts"), "").unwrap();

        let manager = manager(dir.path(), Some(&template));
        let ws = manager.create("pkg", "r").unwrap();
        assert_eq!(manager.seed_scaffolding(&ws).unwrap(), 2);
        assert!(ws.path().join("package.json").is_file());
        assert!(ws.path().join("src/index.ts").is_file());
    }

    #[test]
    fn seed_scaffolding_without_template_is_noop() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let ws = manager.create("pkg", "r").unwrap();
        assert_eq!(manager.seed_scaffolding(&ws).unwrap(), 0);
    }

    #[test]
    fn clone_is_isolated_and_skips_ledger_and_node_modules() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let base = manager.create("pkg", "reqs").unwrap();
        fs::write(base.audit_path(), "{}\n").unwrap();
        fs::create_dir_all(base.path().join("node_modules/left-pad")).unwrap();
        fs::create_dir_all(base.path().join("src")).unwrap();
        fs::write(base.path().join("src/a.ts"), "base").unwrap();

        let sub = manager.clone_workspace(&base, 0, "feat/auth").unwrap();
        assert!(sub.name().ends_with("--0-feat-auth"));
        assert_eq!(fs::read_to_string(sub.requirements_path()).unwrap(), "reqs");
        assert!(!sub.audit_path().exists());
        assert!(!sub.path().join("node_modules").exists());

        fs::write(sub.path().join("src/a.ts"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(base.path().join("src/a.ts")).unwrap(),
            "base"
        );
    }

    #[test]
    fn clones_with_same_slug_get_distinct_directories() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let base = manager.create("pkg", "reqs").unwrap();

        let first = manager.clone_workspace(&base, 0, "feat/auth").unwrap();
        let second = manager.clone_workspace(&base, 1, "feat-auth").unwrap();
        assert_ne!(first.path(), second.path());
        assert!(second.requirements_path().is_file());
    }

    #[test]
    fn remove_deletes_workspace() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path(), None);
        let ws = manager.create("pkg", "r").unwrap();
        manager.remove(&ws).unwrap();
        assert!(!ws.path().exists());
    }
}
