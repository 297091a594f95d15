//! Prompt templates for each build phase.
//!
//! The requirements document is written to the workspace once and only
//! referenced by name here. Later phases lean on the resumed agent session for
//! context instead of re-sending the specification.

use crate::compliance::ComplianceResult;
use crate::policy::ModelTier;
use crate::util::truncate_output;
use crate::workspace::REQUIREMENTS_FILE;

/// Phrase that asks the agent for extended deliberation before editing.
pub const ARCHITECTURAL_TRIGGER: &str = "Think harder";

/// Upper bound on transcript bytes embedded in a repair instruction.
pub const MAX_TRANSCRIPT_CHARS: usize = 12_000;

/// System-prompt addendum shared by every build invocation.
pub fn build_system_prompt() -> String {
    format!(
        "You are building a software package inside an isolated workspace. \
         The static project requirements live in `{}` at the workspace root; \
         read them before making decisions and never modify that file.",
        REQUIREMENTS_FILE
    )
}

/// Prompt for the optional read-only architecture planning phase.
pub fn planning_prompt(package_spec: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Architecture Planning\n\n");
    prompt.push_str(&format!(
        "Read `{}` and the package specification below, then produce an \
         implementation plan. Do not create or modify any files in this step.\n\n",
        REQUIREMENTS_FILE
    ));

    prompt.push_str("## Package Specification\n\n");
    prompt.push_str(package_spec.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## Plan Contents\n\n");
    prompt.push_str("- Module layout and the responsibility of each file\n");
    prompt.push_str("- Public interfaces and the data flowing between modules\n");
    prompt.push_str("- Dependencies to install and why\n");
    prompt.push_str("- Test strategy for each module\n");
    prompt.push_str("- Risks: anything likely to create circular dependencies\n");

    prompt
}

/// Prompt for the scaffold phase.
///
/// When a plan exists the session is resumed, so the specification is already
/// part of the conversation and only the instruction is sent.
pub fn scaffold_prompt(package_spec: &str, planned: bool) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Scaffold\n\n");
    if planned {
        prompt.push_str(
            "Following the plan you just produced, create the project skeleton.\n\n",
        );
    } else {
        prompt.push_str(&format!(
            "Read `{}` and create the project skeleton for the package below.\n\n",
            REQUIREMENTS_FILE
        ));
        prompt.push_str("## Package Specification\n\n");
        prompt.push_str(package_spec.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("## Deliverables\n\n");
    prompt.push_str("- Package manifest with install, build, lint and test scripts\n");
    prompt.push_str("- Compiler and linter configuration\n");
    prompt.push_str("- Source and test directories with empty module stubs\n\n");
    prompt.push_str("Do not implement behaviour yet.\n");

    prompt
}

/// Prompt for the implement phase, always sent on the scaffold session.
pub fn implement_prompt() -> String {
    let mut prompt = String::new();

    prompt.push_str("# Implement\n\n");
    prompt.push_str(
        "Implement the full package inside the skeleton you created, including \
         tests for every module.\n\n",
    );
    prompt.push_str("## Done When\n\n");
    prompt.push_str("- Dependencies install cleanly\n");
    prompt.push_str("- The build passes with no type errors\n");
    prompt.push_str("- The linter reports no errors\n");
    prompt.push_str("- All tests pass\n");

    prompt
}

/// Compose the next repair instruction from a failed compliance pass.
///
/// `High` asks for root-cause reasoning and allows coordinated cross-file
/// changes. `Low` and `Mid` ask for minimal edits and forbid regenerating files.
pub fn compose_repair_instruction(result: &ComplianceResult, tier: ModelTier) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Repair\n\n");
    prompt.push_str("The compliance checks failed.\n\n");

    if let Some(failure) = &result.failure {
        prompt.push_str(&format!("- **Failing command**: `{}`\n", failure.command));
        prompt.push_str(&format!("- **Category**: {}\n\n", failure.category));
    }

    prompt.push_str("## Transcript\n\n```\n");
    prompt.push_str(&truncate_output(&result.transcript, MAX_TRANSCRIPT_CHARS));
    prompt.push_str("\n```\n\n");

    prompt.push_str("## Instructions\n\n");
    match tier {
        ModelTier::High => {
            prompt.push_str(&format!(
                "{} about the root cause before editing anything. This failure \
                 points at a structural problem that crosses file or module \
                 boundaries.\n\n",
                ARCHITECTURAL_TRIGGER
            ));
            prompt.push_str("- Explain the root cause to yourself first\n");
            prompt.push_str(
                "- Coordinated changes across multiple files are allowed when the fix requires them\n",
            );
            prompt.push_str("- Keep the public interfaces from the requirements intact\n");
        }
        ModelTier::Low | ModelTier::Mid => {
            prompt.push_str("Make the smallest change that fixes this failure.\n\n");
            prompt.push_str("- Edit only the lines involved in the failure\n");
            prompt.push_str("- Do not regenerate or rewrite whole files\n");
            prompt.push_str("- Do not touch unrelated code\n");
        }
    }

    prompt
}

/// Prompt for a single parallel sub-task running in its own workspace.
pub fn subtask_prompt(package_spec: &str, task_instruction: &str, branch: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Sub-task `{}`\n\n", branch));
    prompt.push_str(&format!(
        "You own one independent slice of a larger package. Read `{}` first. \
         Other slices are being built concurrently in separate copies of this \
         project; change only what your task needs.\n\n",
        REQUIREMENTS_FILE
    ));

    prompt.push_str("## Package Specification\n\n");
    prompt.push_str(package_spec.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## Your Task\n\n");
    prompt.push_str(task_instruction.trim());
    prompt.push('\n');

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::{ComplianceFailure, FailureCategory};

    fn failed(category: FailureCategory, transcript: &str) -> ComplianceResult {
        ComplianceResult::failed(
            transcript,
            vec!["npm run lint".into()],
            ComplianceFailure {
                command: "npm run lint".into(),
                category,
                output: transcript.into(),
            },
        )
    }

    #[test]
    fn high_tier_repair_includes_trigger_and_cross_file_permission() {
        let result = failed(
            FailureCategory::Test,
            "circular dependency detected between modules a and b",
        );
        let prompt = compose_repair_instruction(&result, ModelTier::High);
        assert!(prompt.contains(ARCHITECTURAL_TRIGGER));
        assert!(prompt.contains("multiple files"));
        assert!(!prompt.contains("Do not regenerate"));
    }

    #[test]
    fn low_tier_repair_is_surgical() {
        let result = failed(FailureCategory::Lint, "no-unused-vars");
        let prompt = compose_repair_instruction(&result, ModelTier::Low);
        assert!(!prompt.contains(ARCHITECTURAL_TRIGGER));
        assert!(prompt.contains("smallest change"));
        assert!(prompt.contains("Do not regenerate"));
        assert!(prompt.contains("`npm run lint`"));
        assert!(prompt.contains("lint"));
    }

    #[test]
    fn mid_tier_repair_is_surgical() {
        let result = failed(FailureCategory::Test, "expected 2 to equal 3");
        let prompt = compose_repair_instruction(&result, ModelTier::Mid);
        assert!(prompt.contains("Do not regenerate"));
        assert!(prompt.contains("expected 2 to equal 3"));
    }

    #[test]
    fn repair_transcript_is_bounded() {
        let transcript = format!("{}final error", "noise\n".repeat(10_000));
        let result = failed(FailureCategory::Test, &transcript);
        let prompt = compose_repair_instruction(&result, ModelTier::Mid);
        assert!(prompt.len() < MAX_TRANSCRIPT_CHARS + 2_000);
        assert!(prompt.contains("final error"));
    }

    #[test]
    fn scaffold_after_planning_omits_spec() {
        let prompt = scaffold_prompt("A todo list service", true);
        assert!(!prompt.contains("A todo list service"));
        assert!(prompt.contains("plan you just produced"));

        let fresh = scaffold_prompt("A todo list service", false);
        assert!(fresh.contains("A todo list service"));
        assert!(fresh.contains(REQUIREMENTS_FILE));
    }

    #[test]
    fn planning_prompt_forbids_edits() {
        let prompt = planning_prompt("spec body");
        assert!(prompt.contains("Do not create or modify any files"));
        assert!(prompt.contains("spec body"));
    }

    #[test]
    fn subtask_prompt_names_branch_and_task() {
        let prompt = subtask_prompt("spec", "Add the auth module", "feat-auth");
        assert!(prompt.contains("`feat-auth`"));
        assert!(prompt.contains("Add the auth module"));
    }
}
