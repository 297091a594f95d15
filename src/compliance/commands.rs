use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ComplianceFailure, ComplianceResult, ComplianceVerifier, FailureCategory};

/// Default timeout for a single compliance command (10 minutes).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// The four compliance stages, in the order they must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Install,
    Build,
    Lint,
    Test,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [Stage::Install, Stage::Build, Stage::Lint, Stage::Test];

    pub fn category(self) -> FailureCategory {
        match self {
            Stage::Install => FailureCategory::DependencyInstall,
            Stage::Build => FailureCategory::TypeBuild,
            Stage::Lint => FailureCategory::Lint,
            Stage::Test => FailureCategory::Test,
        }
    }
}

/// Shell commands for each stage. An empty command skips its stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierCommands {
    pub install: String,
    pub build: String,
    pub lint: String,
    pub test: String,
}

impl Default for VerifierCommands {
    fn default() -> Self {
        Self {
            install: "npm install".to_string(),
            build: "npm run build".to_string(),
            lint: "npm run lint".to_string(),
            test: "npm test".to_string(),
        }
    }
}

impl VerifierCommands {
    fn for_stage(&self, stage: Stage) -> &str {
        match stage {
            Stage::Install => &self.install,
            Stage::Build => &self.build,
            Stage::Lint => &self.lint,
            Stage::Test => &self.test,
        }
    }
}

/// Outcome of running one shell command.
enum CommandOutcome {
    Exited { success: bool, output: String },
    TimedOut,
    SpawnFailed(String),
}

/// Compliance verifier that shells out to the configured stage commands.
pub struct CommandVerifier {
    commands: VerifierCommands,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(commands: VerifierCommands, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    async fn run_command(&self, command: &str, working_dir: &Path) -> CommandOutcome {
        let child = Command::new("sh")
            .args(["-c", command])
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Err(_) => CommandOutcome::TimedOut,
            Ok(Err(e)) => CommandOutcome::SpawnFailed(e.to_string()),
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                CommandOutcome::Exited {
                    success: output.status.success(),
                    output: combined,
                }
            }
        }
    }
}

#[async_trait]
impl ComplianceVerifier for CommandVerifier {
    async fn verify(&self, working_dir: &Path) -> Result<ComplianceResult> {
        let mut transcript = String::new();
        let mut attempted = Vec::new();

        for stage in Stage::ORDER {
            let command = self.commands.for_stage(stage).trim();
            if command.is_empty() {
                debug!(?stage, "Skipping compliance stage with no command");
                continue;
            }

            attempted.push(command.to_string());
            transcript.push_str(&format!("$ {}\n", command));

            let (category, output) = match self.run_command(command, working_dir).await {
                CommandOutcome::Exited {
                    success: true,
                    output,
                } => {
                    transcript.push_str(&output);
                    transcript.push('\n');
                    continue;
                }
                CommandOutcome::Exited {
                    success: false,
                    output,
                } => (stage.category(), output),
                CommandOutcome::TimedOut => (
                    FailureCategory::Unclassified,
                    format!("Command timed out after {}s", self.timeout.as_secs()),
                ),
                CommandOutcome::SpawnFailed(e) => (
                    FailureCategory::Unclassified,
                    format!("Failed to spawn command: {}", e),
                ),
            };

            transcript.push_str(&output);
            transcript.push('\n');
            info!(command, %category, "Compliance check failed");

            return Ok(ComplianceResult::failed(
                transcript,
                attempted,
                ComplianceFailure {
                    command: command.to_string(),
                    category,
                    output,
                },
            ));
        }

        Ok(ComplianceResult::passed(transcript, attempted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commands(install: &str, build: &str, lint: &str, test: &str) -> VerifierCommands {
        VerifierCommands {
            install: install.into(),
            build: build.into(),
            lint: lint.into(),
            test: test.into(),
        }
    }

    #[tokio::test]
    async fn all_stages_pass() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            commands("echo installed", "echo built", "echo linted", "echo tested"),
            Duration::from_secs(10),
        );
        let result = verifier.verify(dir.path()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.commands.len(), 4);
        assert!(result.transcript.contains("$ echo built"));
        assert!(result.transcript.contains("tested"));
    }

    #[tokio::test]
    async fn stops_at_first_failure_and_classifies_lint() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            commands(
                "echo installed",
                "echo built",
                "echo 'no-unused-vars' && exit 1",
                "echo should-not-run",
            ),
            Duration::from_secs(10),
        );
        let result = verifier.verify(dir.path()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.commands.len(), 3);
        let failure = result.failure.unwrap();
        assert_eq!(failure.category, FailureCategory::Lint);
        assert!(failure.output.contains("no-unused-vars"));
        assert!(!failure.output.contains("built"));
        assert!(result.transcript.contains("built"));
        assert!(!result.transcript.contains("should-not-run"));
    }

    #[tokio::test]
    async fn install_failure_is_dependency_category() {
        let dir = TempDir::new().unwrap();
        let verifier = CommandVerifier::new(
            commands("exit 3", "echo built", "", ""),
            Duration::from_secs(10),
        );
        let result = verifier.verify(dir.path()).await.unwrap();
        assert_eq!(result.category(), Some(FailureCategory::DependencyInstall));
        assert_eq!(result.commands, vec!["exit 3".to_string()]);
    }

    #[tokio::test]
    async fn empty_commands_are_skipped() {
        let dir = TempDir::new().unwrap();
        let verifier =
            CommandVerifier::new(commands("", "echo built", "", ""), Duration::from_secs(10));
        let result = verifier.verify(dir.path()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.commands, vec!["echo built".to_string()]);
    }

    #[tokio::test]
    async fn timeout_is_unclassified_failure() {
        let dir = TempDir::new().unwrap();
        let verifier =
            CommandVerifier::new(commands("", "sleep 5", "", ""), Duration::from_millis(100));
        let result = verifier.verify(dir.path()).await.unwrap();
        let failure = result.failure.unwrap();
        assert_eq!(failure.category, FailureCategory::Unclassified);
        assert!(failure.output.contains("timed out"));
    }
}
