//! `kiln.toml` configuration.
//!
//! Values are layered: built-in defaults, then the TOML file, then `KILN_*`
//! environment variables, then CLI flags (applied by the command handlers).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{ClaudeCliExecutor, DEFAULT_AGENT_TIMEOUT_SECS, PermissionMode};
use crate::compliance::commands::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::compliance::{CommandVerifier, VerifierCommands};
use crate::orchestrator::{MAX_ATTEMPTS, OrchestratorSettings};
use crate::policy::ModelCatalog;
use crate::publish::GitPublisher;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Agent CLI settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    /// Claude CLI command (default: "claude")
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    /// Upper bound for one agent invocation, in seconds
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Pass `--dangerously-skip-permissions` to the agent
    #[serde(default)]
    pub skip_permissions: bool,
    /// Permission mode for editing steps: "accept_edits" or "full"
    #[serde(default)]
    pub permission_mode: PermissionMode,
}

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            claude_cmd: default_claude_cmd(),
            timeout_secs: default_agent_timeout_secs(),
            skip_permissions: false,
            permission_mode: PermissionMode::default(),
        }
    }
}

/// Compliance commands, run in order. An empty command skips its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSection {
    #[serde(default = "default_install")]
    pub install: String,
    #[serde(default = "default_build")]
    pub build: String,
    #[serde(default = "default_lint")]
    pub lint: String,
    #[serde(default = "default_test")]
    pub test: String,
    /// Upper bound for each command, in seconds
    #[serde(default = "default_compliance_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_install() -> String {
    VerifierCommands::default().install
}

fn default_build() -> String {
    VerifierCommands::default().build
}

fn default_lint() -> String {
    VerifierCommands::default().lint
}

fn default_test() -> String {
    VerifierCommands::default().test
}

fn default_compliance_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl Default for ComplianceSection {
    fn default() -> Self {
        Self {
            install: default_install(),
            build: default_build(),
            lint: default_lint(),
            test: default_test(),
            timeout_secs: default_compliance_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Directory under which workspaces are created
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    /// Template holding `.claude/` tooling and optional `scaffold/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

fn default_workspace_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("kiln").join("workspaces"))
        .unwrap_or_else(|| PathBuf::from(".kiln").join("workspaces"))
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            template_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishSection {
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// GitHub repository (`owner/repo`) used to add the remote and target PRs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            base_branch: default_base_branch(),
            repository: None,
        }
    }
}

/// Top-level `kiln.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub models: ModelCatalog,
    #[serde(default)]
    pub compliance: ComplianceSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub publish: PublishSection,
}

impl KilnConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse kiln.toml")
    }

    /// Load the effective configuration: an explicit file must exist, otherwise
    /// `./kiln.toml` is used when present. Environment overrides are applied.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.exists() {
                    Self::load(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `KILN_*` overrides from a variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(cmd) = lookup("KILN_CLAUDE_CMD") {
            self.agent.claude_cmd = cmd;
        }
        if let Some(root) = lookup("KILN_WORKSPACE_ROOT") {
            self.workspace.root = PathBuf::from(root);
        }
        if let Some(secs) = lookup("KILN_AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid KILN_AGENT_TIMEOUT_SECS '{}'", secs))?;
        }
        if let Some(model) = lookup("KILN_MODEL_LOW") {
            self.models.low = model;
        }
        if let Some(model) = lookup("KILN_MODEL_MID") {
            self.models.mid = model;
        }
        if let Some(model) = lookup("KILN_MODEL_HIGH") {
            self.models.high = model;
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize kiln.toml")
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            workspace_root: self.workspace.root.clone(),
            template_dir: self.workspace.template_dir.clone(),
            models: self.models.clone(),
            agent_timeout: Duration::from_secs(self.agent.timeout_secs),
            max_attempts: MAX_ATTEMPTS,
            edit_permission: self.agent.permission_mode,
        }
    }

    pub fn executor(&self) -> Arc<ClaudeCliExecutor> {
        Arc::new(ClaudeCliExecutor::new(
            self.agent.claude_cmd.clone(),
            self.agent.skip_permissions,
        ))
    }

    pub fn verifier(&self) -> Arc<CommandVerifier> {
        Arc::new(CommandVerifier::new(
            VerifierCommands {
                install: self.compliance.install.clone(),
                build: self.compliance.build.clone(),
                lint: self.compliance.lint.clone(),
                test: self.compliance.test.clone(),
            },
            Duration::from_secs(self.compliance.timeout_secs),
        ))
    }

    pub fn publisher(&self) -> Arc<GitPublisher> {
        Arc::new(
            GitPublisher::new(self.publish.remote.clone(), self.publish.base_branch.clone())
                .with_repository(self.publish.repository.clone()),
        )
    }
}
