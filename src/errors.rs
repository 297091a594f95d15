//! Typed error hierarchy for the kiln orchestrators.
//!
//! `BuildError` is what a caller of either orchestrator sees. Each variant maps
//! to one row of the failure taxonomy:
//! - `Setup`: workspace or requirements write failed, no agent cost incurred
//! - `AgentInvocation`: the agent executor failed; never enters the repair loop
//! - `VerifierFailed`: the compliance verifier itself could not run
//! - `RepairBudgetExhausted`: compliance kept failing until the bound was hit
//!
//! Every terminal variant points at the workspace so a human can inspect the
//! audit trace and the generated sources.

use std::path::PathBuf;

use thiserror::Error;

use crate::audit::StepName;

/// Errors returned by `BuildOrchestrator::run` and `ParallelOrchestrator::run`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Workspace setup failed at {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "Agent invocation failed during {step} (workspace: {}): {message}",
        workspace.display()
    )]
    AgentInvocation {
        step: StepName,
        workspace: PathBuf,
        message: String,
    },

    #[error("Compliance verifier could not run in {}: {source}", workspace.display())]
    VerifierFailed {
        workspace: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "Build failed after {max_attempts} repair attempts ({repair_attempts} repairs applied); \
         inspect {} and its audit trace at {}",
        workspace.display(),
        audit_path.display()
    )]
    RepairBudgetExhausted {
        max_attempts: u32,
        repair_attempts: u32,
        workspace: PathBuf,
        audit_path: PathBuf,
        /// Failing transcripts of every verification pass, oldest first.
        transcript: String,
    },

    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BuildError {
    /// Terminal build errors are never retried by the caller's infrastructure;
    /// the repair loop has already spent the budget or the failure is structural.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Workspace to inspect, when the failure happened after setup.
    pub fn workspace(&self) -> Option<&std::path::Path> {
        match self {
            BuildError::Setup { path, .. } => Some(path),
            BuildError::AgentInvocation { workspace, .. }
            | BuildError::VerifierFailed { workspace, .. }
            | BuildError::RepairBudgetExhausted { workspace, .. } => Some(workspace),
            BuildError::InvalidRequest(_) | BuildError::Other(_) => None,
        }
    }
}
