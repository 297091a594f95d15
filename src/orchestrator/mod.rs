//! Build orchestration.
//!
//! [`sequential::BuildOrchestrator`] drives one agent session chain through
//! setup, optional planning, scaffold, implement and a bounded verify/repair
//! loop. [`parallel::ParallelOrchestrator`] fans independent sub-tasks out to
//! isolated copies of a shared base workspace and merges them back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::agent::{AgentExecutor, DEFAULT_AGENT_TIMEOUT_SECS, PermissionMode, SessionToken};
use crate::audit::{AuditEntry, AuditLedger, AuditSink};
use crate::compliance::ComplianceVerifier;
use crate::policy::{ModelCatalog, ModelOverrides};
use crate::publish::PublishOutcome;
use crate::workspace::{Workspace, WorkspaceManager};

pub mod parallel;
pub mod sequential;

#[cfg(test)]
pub(crate) mod testing;

pub use parallel::{ParallelBuildRequest, ParallelBuildResult, ParallelOrchestrator, SubTask};
pub use sequential::BuildOrchestrator;

/// Maximum verification passes per run. Repairs are bounded by `MAX_ATTEMPTS - 1`.
pub const MAX_ATTEMPTS: u32 = 3;

/// Immutable input for one sequential build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Human-readable package name, used for the workspace and branch names.
    pub package_name: String,
    pub package_spec: String,
    /// Static requirements, written to the workspace once.
    pub requirements: String,
    #[serde(default)]
    pub enable_planning: bool,
    #[serde(default)]
    pub model_overrides: ModelOverrides,
    #[serde(default)]
    pub publish: bool,
    /// Overrides the configured workspace root.
    #[serde(default)]
    pub base_path: Option<PathBuf>,
}

/// Terminal output of a successful sequential build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub run_id: Uuid,
    pub success: bool,
    pub workspace: PathBuf,
    /// Sum of every agent invocation's reported cost.
    pub total_cost_usd: f64,
    pub session: Option<SessionToken>,
    pub repair_attempts: u32,
    pub verification_passes: u32,
    pub publish: Option<PublishOutcome>,
}

/// Settings shared by both orchestrators.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub workspace_root: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub models: ModelCatalog,
    pub agent_timeout: Duration,
    pub max_attempts: u32,
    /// Permission mode for steps that edit files (scaffold, implement, repair, sub-tasks).
    pub edit_permission: PermissionMode,
}

impl OrchestratorSettings {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            template_dir: None,
            models: ModelCatalog::default(),
            agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            max_attempts: MAX_ATTEMPTS,
            edit_permission: PermissionMode::AcceptEdits,
        }
    }

    /// Workspace manager for a request, honouring its optional base path.
    pub(crate) fn workspace_manager(&self, base_path: Option<&PathBuf>) -> WorkspaceManager {
        WorkspaceManager::new(
            base_path.cloned().unwrap_or_else(|| self.workspace_root.clone()),
            self.template_dir.clone(),
        )
    }
}

/// Collaborators shared by both orchestrators.
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub executor: Arc<dyn AgentExecutor>,
    pub verifier: Arc<dyn ComplianceVerifier>,
}

/// Per-run bookkeeping owned by exactly one orchestrator invocation.
pub(crate) struct RunState {
    pub run_id: Uuid,
    pub workspace: Workspace,
    ledger: AuditLedger,
    pub total_cost_usd: f64,
    pub session: Option<SessionToken>,
}

impl RunState {
    pub fn new(run_id: Uuid, workspace: Workspace) -> Self {
        let ledger = AuditLedger::new(workspace.path());
        Self {
            run_id,
            workspace,
            ledger,
            total_cost_usd: 0.0,
            session: None,
        }
    }

    /// Append an entry. The ledger is an observability artifact, so a failed
    /// write is logged and the run continues.
    pub fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.ledger.append(&entry) {
            warn!(
                run_id = %self.run_id,
                step = %entry.step,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        self.ledger.path().to_path_buf()
    }
}
