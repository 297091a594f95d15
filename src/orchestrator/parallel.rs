//! Fan-out/merge build.
//!
//! One shared base workspace is turned into a git repository with a baseline
//! commit. Each sub-task gets a full filesystem copy of it, checked out on the
//! task's branch, and exactly one fresh agent invocation. Once every sub-task
//! has settled, successful branches are fetched back and merged one at a time
//! in task order. Conflicts are collected as data, sub-workspaces are always
//! removed, and the merged result is verified once.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Collaborators, OrchestratorSettings, RunState};
use crate::agent::{AgentExecutor, AgentRequest, BUILD_TOOLS, SessionToken};
use crate::audit::{AuditEntry, StepName};
use crate::compliance::{ComplianceResult, ComplianceVerifier};
use crate::errors::BuildError;
use crate::git::GitRepo;
use crate::policy::{ModelCatalog, ModelOverrides, ModelTier};
use crate::prompts;
use crate::workspace::{Workspace, WorkspaceManager};

/// One independent slice of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub instruction: String,
    pub branch: String,
    #[serde(default = "default_subtask_tier")]
    pub tier: ModelTier,
}

fn default_subtask_tier() -> ModelTier {
    ModelTier::Mid
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParallelBuildRequest {
    pub package_name: String,
    pub package_spec: String,
    pub requirements: String,
    pub tasks: Vec<SubTask>,
    /// Copy the template's shared scaffolding into the base before fan-out.
    #[serde(default)]
    pub seed_scaffolding: bool,
    #[serde(default)]
    pub model_overrides: ModelOverrides,
    #[serde(default)]
    pub base_path: Option<PathBuf>,
}

/// How one sub-task ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskOutcome {
    pub branch: String,
    pub success: bool,
    pub cost_usd: f64,
    pub session: Option<SessionToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal output of a parallel build. Partial success is a valid outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBuildResult {
    pub run_id: Uuid,
    pub workspace: PathBuf,
    /// Whether the merged result passed compliance.
    pub verified: bool,
    pub total_cost_usd: f64,
    pub subtasks: Vec<SubTaskOutcome>,
    /// Branches merged into the base, in merge order.
    pub merged: Vec<String>,
    /// Branches whose merge was aborted.
    pub merge_conflicts: Vec<String>,
    /// Branches whose agent invocation or sub-workspace setup failed.
    pub failed_tasks: Vec<String>,
    pub compliance: ComplianceResult,
}

/// A settled sub-task, with the sub-workspace to merge from and clean up.
struct Settled {
    outcome: SubTaskOutcome,
    tier: ModelTier,
    sub_workspace: Option<Workspace>,
}

pub struct ParallelOrchestrator {
    collaborators: Collaborators,
    settings: OrchestratorSettings,
}

impl ParallelOrchestrator {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        verifier: Arc<dyn ComplianceVerifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            collaborators: Collaborators { executor, verifier },
            settings,
        }
    }

    pub async fn run(
        &self,
        request: &ParallelBuildRequest,
    ) -> Result<ParallelBuildResult, BuildError> {
        validate(request)?;

        let run_id = Uuid::new_v4();
        let models = self.settings.models.with_overrides(&request.model_overrides);
        let manager = self.settings.workspace_manager(request.base_path.as_ref());

        let workspace = manager
            .create(&request.package_name, &request.requirements)
            .map_err(|source| BuildError::Setup {
                path: manager.base_path().to_path_buf(),
                source,
            })?;
        let mut run = RunState::new(run_id, workspace);
        run.record(AuditEntry::new(run_id, StepName::WorkspaceSetup));

        if request.seed_scaffolding {
            match manager.seed_scaffolding(&run.workspace) {
                Ok(files) => info!(%run_id, files, "Seeded shared scaffolding"),
                Err(e) => warn!(%run_id, error = %e, "Failed to seed scaffolding; continuing"),
            }
        }

        let base_path = run.workspace.path().to_path_buf();
        let base_repo = tokio::task::spawn_blocking(move || {
            let repo = GitRepo::init(&base_path)?;
            repo.snapshot("kiln: baseline")?;
            Ok::<_, anyhow::Error>(repo)
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result)
        .map_err(|source| BuildError::Setup {
            path: run.workspace.path().to_path_buf(),
            source,
        })?;

        info!(%run_id, tasks = request.tasks.len(), "Fanning out sub-tasks");
        let settled = self.fan_out(&run, &manager, request, &models).await;

        for task in &settled {
            run.total_cost_usd += task.outcome.cost_usd;
            let mut entry = AuditEntry::new(run_id, StepName::Subtask(task.outcome.branch.clone()))
                .with_cost(task.outcome.cost_usd)
                .with_session(task.outcome.session.clone())
                .with_tier(task.tier);
            if let Some(error) = &task.outcome.error {
                entry = entry.with_detail(error.clone());
            }
            run.record(entry);
        }

        let mut merged = Vec::new();
        let mut merge_conflicts = Vec::new();
        for task in &settled {
            let (true, Some(sub)) = (task.outcome.success, &task.sub_workspace) else {
                continue;
            };
            let branch = &task.outcome.branch;
            let result = match base_repo.fetch_branch(sub.path(), branch).await {
                Ok(()) => base_repo.merge_no_ff(branch).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(true) => merged.push(branch.clone()),
                Ok(false) => {
                    warn!(%run_id, branch = %branch, "Merge conflict");
                    merge_conflicts.push(branch.clone());
                }
                Err(e) => {
                    warn!(%run_id, branch = %branch, error = %e, "Merge command failed");
                    merge_conflicts.push(branch.clone());
                }
            }
        }
        run.record(AuditEntry::new(run_id, StepName::Merge).with_detail(format!(
            "merged: [{}]; conflicts: [{}]",
            merged.join(", "),
            merge_conflicts.join(", ")
        )));

        // Always clean up every sub-workspace, even after conflicts
        for sub in settled.iter().filter_map(|t| t.sub_workspace.as_ref()) {
            if let Err(e) = manager.remove(sub) {
                warn!(
                    %run_id,
                    sub_workspace = %sub.path().display(),
                    error = %e,
                    "Failed to clean up sub-workspace"
                );
            }
        }

        let compliance = self
            .collaborators
            .verifier
            .verify(run.workspace.path())
            .await
            .map_err(|source| BuildError::VerifierFailed {
                workspace: run.workspace.path().to_path_buf(),
                source,
            })?;
        run.record(
            AuditEntry::new(run_id, StepName::ValidationInitial).with_compliance(&compliance),
        );

        let failed_tasks: Vec<String> = settled
            .iter()
            .filter(|t| !t.outcome.success)
            .map(|t| t.outcome.branch.clone())
            .collect();

        info!(
            %run_id,
            verified = compliance.success,
            merged = merged.len(),
            conflicts = merge_conflicts.len(),
            failed = failed_tasks.len(),
            total_cost_usd = run.total_cost_usd,
            "Parallel build finished"
        );

        Ok(ParallelBuildResult {
            run_id,
            workspace: run.workspace.path().to_path_buf(),
            verified: compliance.success,
            total_cost_usd: run.total_cost_usd,
            subtasks: settled.into_iter().map(|t| t.outcome).collect(),
            merged,
            merge_conflicts,
            failed_tasks,
            compliance,
        })
    }

    /// Create every sub-workspace and run every sub-task concurrently, then wait for all.
    async fn fan_out(
        &self,
        run: &RunState,
        manager: &WorkspaceManager,
        request: &ParallelBuildRequest,
        models: &ModelCatalog,
    ) -> Vec<Settled> {
        let mut handles = Vec::with_capacity(request.tasks.len());

        for (index, task) in request.tasks.iter().enumerate() {
            let executor = Arc::clone(&self.collaborators.executor);
            let manager = manager.clone();
            let base = run.workspace.clone();
            let agent_request = AgentRequest::new(
                prompts::subtask_prompt(&request.package_spec, &task.instruction, &task.branch),
                PathBuf::new(),
                task.tier,
                models.model_for(task.tier),
            )
            .with_tools(BUILD_TOOLS)
            .with_permission(self.settings.edit_permission)
            .with_system_prompt(prompts::build_system_prompt())
            .with_timeout(self.settings.agent_timeout);
            let task = task.clone();

            handles.push(tokio::spawn(async move {
                run_subtask(executor, manager, base, index, task, agent_request).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(&request.tasks)
            .map(|(joined, task)| match joined {
                Ok(settled) => settled,
                Err(join_err) => {
                    warn!(branch = %task.branch, error = %join_err, "Sub-task panicked");
                    Settled {
                        outcome: SubTaskOutcome {
                            branch: task.branch.clone(),
                            success: false,
                            cost_usd: 0.0,
                            session: None,
                            error: Some(format!("sub-task panicked: {}", join_err)),
                        },
                        tier: task.tier,
                        sub_workspace: None,
                    }
                }
            })
            .collect()
    }
}

/// Clone the base, branch, invoke the agent once and commit its work.
async fn run_subtask(
    executor: Arc<dyn AgentExecutor>,
    manager: WorkspaceManager,
    base: Workspace,
    index: usize,
    task: SubTask,
    mut request: AgentRequest,
) -> Settled {
    let failed = |error: String, sub_workspace: Option<Workspace>| Settled {
        outcome: SubTaskOutcome {
            branch: task.branch.clone(),
            success: false,
            cost_usd: 0.0,
            session: None,
            error: Some(error),
        },
        tier: task.tier,
        sub_workspace,
    };

    let label = task.branch.clone();
    let cloned =
        tokio::task::spawn_blocking(move || manager.clone_workspace(&base, index, &label)).await;
    let sub = match cloned {
        Ok(Ok(sub)) => sub,
        Ok(Err(e)) => return failed(format!("sub-workspace setup failed: {:#}", e), None),
        Err(e) => return failed(format!("sub-workspace setup panicked: {}", e), None),
    };

    let repo = match GitRepo::open(sub.path()) {
        Ok(repo) => repo,
        Err(e) => return failed(format!("{:#}", e), Some(sub)),
    };
    if let Err(e) = repo.checkout_new_branch(&task.branch).await {
        return failed(format!("{:#}", e), Some(sub));
    }

    request.working_dir = sub.path().to_path_buf();
    let response = match executor.invoke(request).await {
        Ok(response) => response,
        Err(failure) => {
            warn!(branch = %task.branch, error = %failure.message, "Sub-task agent failed");
            let mut settled = failed(failure.message, Some(sub));
            settled.outcome.session = failure.session_token;
            return settled;
        }
    };

    let message = format!("kiln: {}", task.branch);
    let committer = repo.clone();
    let committed = tokio::task::spawn_blocking(move || committer.snapshot(&message))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
    if let Err(e) = committed {
        let mut settled = failed(format!("Failed to commit sub-task work: {:#}", e), Some(sub));
        settled.outcome.cost_usd = response.cost_usd;
        settled.outcome.session = response.session;
        return settled;
    }

    info!(branch = %task.branch, cost_usd = response.cost_usd, "Sub-task completed");
    Settled {
        outcome: SubTaskOutcome {
            branch: task.branch.clone(),
            success: true,
            cost_usd: response.cost_usd,
            session: response.session,
            error: None,
        },
        tier: task.tier,
        sub_workspace: Some(sub),
    }
}

fn validate(request: &ParallelBuildRequest) -> Result<(), BuildError> {
    if request.tasks.is_empty() {
        return Err(BuildError::InvalidRequest(
            "parallel build needs at least one task".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for task in &request.tasks {
        if task.branch.trim().is_empty() {
            return Err(BuildError::InvalidRequest(
                "every task needs a branch name".to_string(),
            ));
        }
        if !seen.insert(task.branch.as_str()) {
            return Err(BuildError::InvalidRequest(format!(
                "duplicate branch name '{}'",
                task.branch
            )));
        }
    }
    Ok(())
}
