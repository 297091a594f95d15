//! Compliance verification contract.
//!
//! A verifier runs install → build → lint → test in the workspace, stops at the
//! first failure and classifies it into a closed set of categories. The
//! orchestrators only react to the resulting [`ComplianceResult`]; timeouts are
//! the verifier's business and surface as an `Unclassified` failure.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod commands;

pub use commands::{CommandVerifier, VerifierCommands};

/// Closed set of compliance failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    DependencyInstall,
    TypeBuild,
    Lint,
    Test,
    Unclassified,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCategory::DependencyInstall => write!(f, "dependency_install"),
            FailureCategory::TypeBuild => write!(f, "type_build"),
            FailureCategory::Lint => write!(f, "lint"),
            FailureCategory::Test => write!(f, "test"),
            FailureCategory::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// The first failing command of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFailure {
    pub command: String,
    pub category: FailureCategory,
    /// Output of the failing command alone.
    pub output: String,
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub success: bool,
    /// Combined transcript of every command run in this pass.
    pub transcript: String,
    /// Commands attempted, in execution order.
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ComplianceFailure>,
}

impl ComplianceResult {
    pub fn passed(transcript: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            success: true,
            transcript: transcript.into(),
            commands,
            failure: None,
        }
    }

    pub fn failed(
        transcript: impl Into<String>,
        commands: Vec<String>,
        failure: ComplianceFailure,
    ) -> Self {
        Self {
            success: false,
            transcript: transcript.into(),
            commands,
            failure: Some(failure),
        }
    }

    pub fn category(&self) -> Option<FailureCategory> {
        self.failure.as_ref().map(|f| f.category)
    }
}

/// Runs the compliance checks for a workspace.
///
/// Real implementation: [`CommandVerifier`]. An `Err` means the verifier could
/// not run at all; a failing check is an `Ok` result with `success == false`.
#[async_trait]
pub trait ComplianceVerifier: Send + Sync {
    async fn verify(&self, working_dir: &Path) -> Result<ComplianceResult>;
}
