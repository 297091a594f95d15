//! Sequential build state machine.
//!
//! `Setup → [Planning] → Scaffold → Implement → Verify → {Success | Repair → Verify}*`
//!
//! Every transition appends one audit entry before the next step starts, and
//! agent cost is added to the run total immediately after each invocation.
//! Only compliance failures enter the repair loop; executor failures end the
//! run at the step that failed. A step that hits its time bound is recorded and
//! the run moves on: a timed-out repair still consumes its attempt.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::{BuildRequest, BuildResult, Collaborators, OrchestratorSettings, RunState};
use crate::agent::{
    AgentExecutor, AgentRequest, BUILD_TOOLS, PLANNING_TOOLS, PermissionMode, REPAIR_TOOLS,
};
use crate::audit::{AuditEntry, StepName};
use crate::compliance::{ComplianceResult, ComplianceVerifier};
use crate::errors::BuildError;
use crate::policy::{ModelCatalog, ModelTier, select_model_tier};
use crate::prompts;
use crate::publish::{Publisher, publish_workspace};

/// Tier used for scaffold and implement.
const BUILD_TIER: ModelTier = ModelTier::Mid;

pub struct BuildOrchestrator {
    collaborators: Collaborators,
    publisher: Option<Arc<dyn Publisher>>,
    settings: OrchestratorSettings,
}

impl BuildOrchestrator {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        verifier: Arc<dyn ComplianceVerifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            collaborators: Collaborators { executor, verifier },
            publisher: None,
            settings,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Run one build to a terminal state.
    pub async fn run(&self, request: &BuildRequest) -> Result<BuildResult, BuildError> {
        if request.package_spec.trim().is_empty() {
            return Err(BuildError::InvalidRequest(
                "package specification is empty".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let models = self.settings.models.with_overrides(&request.model_overrides);

        // Setup: nothing has been spent yet, so failures here are cheap and fatal
        let manager = self.settings.workspace_manager(request.base_path.as_ref());
        let workspace = manager
            .create(&request.package_name, &request.requirements)
            .map_err(|source| BuildError::Setup {
                path: manager.base_path().to_path_buf(),
                source,
            })?;
        info!(%run_id, workspace = %workspace.path().display(), "Build started");

        let mut run = RunState::new(run_id, workspace);
        run.record(AuditEntry::new(run_id, StepName::WorkspaceSetup));

        let planned = if request.enable_planning {
            let req = self
                .agent_request(
                    &run,
                    prompts::planning_prompt(&request.package_spec),
                    ModelTier::High,
                    &models,
                )
                .with_tools(PLANNING_TOOLS)
                .with_permission(PermissionMode::Plan);
            self.invoke(&mut run, StepName::ArchitecturePlanning, req)
                .await?
        } else {
            false
        };

        let mut scaffold = self
            .agent_request(
                &run,
                prompts::scaffold_prompt(&request.package_spec, planned),
                BUILD_TIER,
                &models,
            )
            .with_tools(BUILD_TOOLS)
            .with_permission(self.settings.edit_permission);
        if planned {
            scaffold = scaffold.resuming(run.session.as_ref());
        }
        self.invoke(&mut run, StepName::Scaffold, scaffold).await?;

        let implement = self
            .agent_request(&run, prompts::implement_prompt(), BUILD_TIER, &models)
            .resuming(run.session.as_ref())
            .with_tools(BUILD_TOOLS)
            .with_permission(self.settings.edit_permission);
        self.invoke(&mut run, StepName::Implement, implement).await?;

        let repair_attempts = self.verify_and_repair(&mut run, &models).await?;

        let publish = match (&self.publisher, request.publish) {
            (Some(publisher), true) => {
                Some(self.publish(publisher.as_ref(), &run, request, repair_attempts).await)
            }
            (None, true) => {
                warn!(%run_id, "Publish requested but no publisher is configured");
                None
            }
            _ => None,
        };

        info!(
            %run_id,
            total_cost_usd = run.total_cost_usd,
            repair_attempts,
            "Build succeeded"
        );

        Ok(BuildResult {
            run_id,
            success: true,
            workspace: run.workspace.path().to_path_buf(),
            total_cost_usd: run.total_cost_usd,
            session: run.session.clone(),
            repair_attempts,
            verification_passes: repair_attempts + 1,
            publish,
        })
    }

    /// Verify until compliance passes or the attempt bound is reached.
    ///
    /// Returns the number of repairs applied before the passing verification.
    async fn verify_and_repair(
        &self,
        run: &mut RunState,
        models: &ModelCatalog,
    ) -> Result<u32, BuildError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut pass: u32 = 1;
        let mut transcripts = String::new();

        loop {
            let result = self.verify(run).await?;
            run.record(
                AuditEntry::new(run.run_id, StepName::validation(pass)).with_compliance(&result),
            );
            if result.success {
                info!(run_id = %run.run_id, pass, "Compliance checks passed");
                return Ok(pass - 1);
            }
            transcripts.push_str(&format!(
                "=== verification pass {} ===\n{}\n",
                pass, result.transcript
            ));

            if pass >= max_attempts {
                warn!(
                    run_id = %run.run_id,
                    pass,
                    category = ?result.category(),
                    "Repair budget exhausted"
                );
                return Err(BuildError::RepairBudgetExhausted {
                    max_attempts,
                    repair_attempts: pass - 1,
                    workspace: run.workspace.path().to_path_buf(),
                    audit_path: run.audit_path(),
                    transcript: transcripts,
                });
            }

            let tier = select_model_tier(&result);
            info!(
                run_id = %run.run_id,
                pass,
                category = ?result.category(),
                %tier,
                "Compliance failed, repairing"
            );

            let repair = self
                .agent_request(
                    run,
                    prompts::compose_repair_instruction(&result, tier),
                    tier,
                    models,
                )
                .resuming(run.session.as_ref())
                .with_tools(REPAIR_TOOLS)
                .with_permission(self.settings.edit_permission);
            self.invoke(run, StepName::Repair(pass), repair).await?;

            pass += 1;
        }
    }

    async fn verify(&self, run: &RunState) -> Result<ComplianceResult, BuildError> {
        self.collaborators
            .verifier
            .verify(run.workspace.path())
            .await
            .map_err(|source| BuildError::VerifierFailed {
                workspace: run.workspace.path().to_path_buf(),
                source,
            })
    }

    fn agent_request(
        &self,
        run: &RunState,
        instruction: String,
        tier: ModelTier,
        models: &ModelCatalog,
    ) -> AgentRequest {
        AgentRequest::new(instruction, run.workspace.path(), tier, models.model_for(tier))
            .with_system_prompt(prompts::build_system_prompt())
            .with_timeout(self.settings.agent_timeout)
    }

    /// Invoke the agent, account for its cost, hand its session forward and audit the step.
    ///
    /// Returns `false` when the step timed out and the run should carry on without it.
    async fn invoke(
        &self,
        run: &mut RunState,
        step: StepName,
        request: AgentRequest,
    ) -> Result<bool, BuildError> {
        let tier = request.tier;

        match self.collaborators.executor.invoke(request).await {
            Ok(response) => {
                run.total_cost_usd += response.cost_usd;
                run.session = response.session.clone();
                run.record(
                    AuditEntry::new(run.run_id, step.clone())
                        .with_cost(response.cost_usd)
                        .with_session(response.session.clone())
                        .with_tier(tier)
                        .with_agent_stats(response.duration_ms, response.num_turns),
                );
                info!(
                    run_id = %run.run_id,
                    %step,
                    %tier,
                    cost_usd = response.cost_usd,
                    total_cost_usd = run.total_cost_usd,
                    "Step completed"
                );
                Ok(true)
            }
            Err(failure) if failure.timed_out => {
                warn!(
                    run_id = %run.run_id,
                    %step,
                    error = %failure.message,
                    "Agent step timed out; continuing"
                );
                if failure.session_token.is_some() {
                    run.session = failure.session_token.clone();
                }
                run.record(
                    AuditEntry::new(run.run_id, step)
                        .with_session(failure.session_token)
                        .with_tier(tier)
                        .with_detail(format!("agent step timed out: {}", failure.message)),
                );
                Ok(false)
            }
            Err(failure) => {
                warn!(
                    run_id = %run.run_id,
                    %step,
                    error = %failure.message,
                    raw_output_chars = failure.raw_output.len(),
                    "Agent invocation failed"
                );
                run.record(
                    AuditEntry::new(run.run_id, step.clone())
                        .with_session(failure.session_token.clone())
                        .with_tier(tier)
                        .with_detail(format!("agent invocation failed: {}", failure.message)),
                );
                Err(BuildError::AgentInvocation {
                    step,
                    workspace: run.workspace.path().to_path_buf(),
                    message: failure.message,
                })
            }
        }
    }

    async fn publish(
        &self,
        publisher: &dyn Publisher,
        run: &RunState,
        request: &BuildRequest,
        repair_attempts: u32,
    ) -> crate::publish::PublishOutcome {
        let branch = format!("kiln/{}", run.workspace.name());
        let title = format!("Build {}", request.package_name);
        let body = format!(
            "## Summary\n\nAutomated build of **{}**.\n\n\
             - Run: `{}`\n- Repairs: {}\n- Agent cost: ${:.4}\n",
            request.package_name, run.run_id, repair_attempts, run.total_cost_usd
        );
        publish_workspace(publisher, run.workspace.path(), &branch, &title, &body).await
    }
}
