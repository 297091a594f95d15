//! Append-only audit trail for a build run.
//!
//! One [`AuditEntry`] is recorded per phase or attempt. Entries are never
//! rewritten; a replayed step may append a duplicate, which is acceptable
//! because the trail is an observability artifact rather than a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::SessionToken;
use crate::compliance::{ComplianceResult, FailureCategory};
use crate::policy::ModelTier;

pub mod ledger;
pub use ledger::{AUDIT_FILE_NAME, AuditLedger, LedgerRecord, read_ledger};

/// Name of a recorded step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StepName {
    WorkspaceSetup,
    ArchitecturePlanning,
    Scaffold,
    Implement,
    ValidationInitial,
    /// Verification pass N, for N >= 2.
    ValidationAttempt(u32),
    /// Repair N, 1-based.
    Repair(u32),
    /// A parallel sub-task, keyed by its branch name.
    Subtask(String),
    Merge,
}

impl StepName {
    /// Step name for the given 1-based verification pass.
    pub fn validation(pass: u32) -> Self {
        if pass <= 1 {
            StepName::ValidationInitial
        } else {
            StepName::ValidationAttempt(pass)
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepName::WorkspaceSetup => write!(f, "workspace_setup"),
            StepName::ArchitecturePlanning => write!(f, "architecture_planning"),
            StepName::Scaffold => write!(f, "scaffold"),
            StepName::Implement => write!(f, "implement"),
            StepName::ValidationInitial => write!(f, "validation_initial"),
            StepName::ValidationAttempt(n) => write!(f, "validation_attempt_{}", n),
            StepName::Repair(n) => write!(f, "repair_{}", n),
            StepName::Subtask(branch) => write!(f, "subtask_{}", branch),
            StepName::Merge => write!(f, "merge"),
        }
    }
}

impl From<StepName> for String {
    fn from(step: StepName) -> Self {
        step.to_string()
    }
}

impl TryFrom<String> for StepName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let step = match value.as_str() {
            "workspace_setup" => StepName::WorkspaceSetup,
            "architecture_planning" => StepName::ArchitecturePlanning,
            "scaffold" => StepName::Scaffold,
            "implement" => StepName::Implement,
            "validation_initial" => StepName::ValidationInitial,
            "merge" => StepName::Merge,
            other => {
                if let Some(n) = other.strip_prefix("validation_attempt_") {
                    StepName::ValidationAttempt(
                        n.parse().map_err(|_| format!("Invalid step name '{}'", other))?,
                    )
                } else if let Some(n) = other.strip_prefix("repair_") {
                    StepName::Repair(
                        n.parse().map_err(|_| format!("Invalid step name '{}'", other))?,
                    )
                } else if let Some(branch) = other.strip_prefix("subtask_") {
                    StepName::Subtask(branch.to_string())
                } else {
                    return Err(format!("Invalid step name '{}'", other));
                }
            }
        };
        Ok(step)
    }
}

/// Validation status attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[serde(rename = "pass")]
    Pass,
    #[serde(rename = "fail")]
    Fail,
    #[serde(rename = "not-applicable")]
    NotApplicable,
}

/// One record of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub run_id: Uuid,
    pub step: StepName,
    /// When the step completed.
    pub timestamp: DateTime<Utc>,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SessionToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<ModelTier>,
    pub validation: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_category: Option<FailureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(run_id: Uuid, step: StepName) -> Self {
        Self {
            run_id,
            step,
            timestamp: Utc::now(),
            cost_usd: 0.0,
            session_token: None,
            model_tier: None,
            validation: ValidationStatus::NotApplicable,
            transcript_chars: None,
            transcript: None,
            failure_category: None,
            failing_command: None,
            duration_ms: None,
            num_turns: None,
            detail: None,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_session(mut self, token: Option<SessionToken>) -> Self {
        self.session_token = token;
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = Some(tier);
        self
    }

    pub fn with_agent_stats(mut self, duration_ms: u64, num_turns: u32) -> Self {
        self.duration_ms = Some(duration_ms);
        self.num_turns = Some(num_turns);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the outcome of a verification pass. Failed passes keep their transcript.
    pub fn with_compliance(mut self, result: &ComplianceResult) -> Self {
        if result.success {
            self.validation = ValidationStatus::Pass;
        } else {
            self.validation = ValidationStatus::Fail;
            self.transcript_chars = Some(result.transcript.len());
            self.transcript = Some(result.transcript.clone());
            if let Some(failure) = &result.failure {
                self.failure_category = Some(failure.category);
                self.failing_command = Some(failure.command.clone());
            }
        }
        self
    }
}

/// Receives audit entries from an orchestrator.
///
/// Implementations must tolerate duplicate appends for a re-executed step.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceFailure;

    #[test]
    fn step_names_render_as_wire_strings() {
        assert_eq!(StepName::WorkspaceSetup.to_string(), "workspace_setup");
        assert_eq!(StepName::validation(1).to_string(), "validation_initial");
        assert_eq!(StepName::validation(3).to_string(), "validation_attempt_3");
        assert_eq!(StepName::Repair(2).to_string(), "repair_2");
        assert_eq!(
            StepName::Subtask("feat/auth".into()).to_string(),
            "subtask_feat/auth"
        );
    }

    #[test]
    fn step_name_parses_back() {
        for step in [
            StepName::ArchitecturePlanning,
            StepName::ValidationAttempt(2),
            StepName::Repair(1),
            StepName::Subtask("a-b".into()),
            StepName::Merge,
        ] {
            let parsed = StepName::try_from(step.to_string()).unwrap();
            assert_eq!(parsed, step);
        }
        assert!(StepName::try_from("repair_x".to_string()).is_err());
        assert!(StepName::try_from("deploy".to_string()).is_err());
    }

    #[test]
    fn validation_status_uses_hyphenated_not_applicable() {
        let json = serde_json::to_string(&ValidationStatus::NotApplicable).unwrap();
        assert_eq!(json, "\"not-applicable\"");
    }

    #[test]
    fn failed_compliance_records_transcript_size() {
        let result = ComplianceResult::failed(
            "$ npm test\n1 failing",
            vec!["npm test".into()],
            ComplianceFailure {
                command: "npm test".into(),
                category: FailureCategory::Test,
                output: "1 failing".into(),
            },
        );
        let entry = AuditEntry::new(Uuid::new_v4(), StepName::ValidationInitial)
            .with_compliance(&result);
        assert_eq!(entry.validation, ValidationStatus::Fail);
        assert_eq!(entry.transcript_chars, Some(result.transcript.len()));
        assert_eq!(entry.failure_category, Some(FailureCategory::Test));
        assert_eq!(entry.failing_command.as_deref(), Some("npm test"));
    }

    #[test]
    fn passed_compliance_omits_transcript() {
        let result = ComplianceResult::passed("all good", vec![]);
        let entry = AuditEntry::new(Uuid::new_v4(), StepName::validation(2))
            .with_compliance(&result);
        assert_eq!(entry.validation, ValidationStatus::Pass);
        assert!(entry.transcript_chars.is_none());
        assert!(entry.transcript.is_none());
    }

    #[test]
    fn entry_serializes_step_as_string() {
        let entry = AuditEntry::new(Uuid::new_v4(), StepName::Repair(1))
            .with_tier(ModelTier::Low)
            .with_cost(0.25);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["step"], "repair_1");
        assert_eq!(value["model_tier"], "low");
        assert_eq!(value["validation"], "not-applicable");
        assert_eq!(value["cost_usd"], 0.25);
    }
}
