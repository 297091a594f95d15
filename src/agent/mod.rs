//! Agent executor contract.
//!
//! The orchestrators drive a coding agent only through [`AgentExecutor`]. The
//! session token returned by one invocation is handed to the next one so the
//! agent keeps its memory of earlier phases; the token itself is opaque and is
//! never inspected.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::ModelTier;

pub mod claude;

pub use claude::ClaudeCliExecutor;

/// Read-only tools for the planning phase.
pub const PLANNING_TOOLS: &[&str] = &["Read", "Glob", "Grep"];

/// Tools for phases that create files (scaffold, implement, parallel sub-tasks).
pub const BUILD_TOOLS: &[&str] = &["Read", "Write", "Edit", "MultiEdit", "Bash", "Glob", "Grep"];

/// Edit-only tools for repairs: existing files may change, none are created.
pub const REPAIR_TOOLS: &[&str] = &["Read", "Edit", "MultiEdit", "Glob", "Grep"];

/// Default upper bound for one agent invocation (30 minutes).
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 1800;

/// Opaque handle to an agent conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much the agent may change without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// File edits are accepted automatically.
    #[default]
    AcceptEdits,
    /// Reasoning only, no modifications.
    Plan,
    /// Everything is permitted, including commands outside the allowed tools.
    Full,
}


impl PermissionMode {
    /// Value of the agent CLI's `--permission-mode` flag.
    pub fn cli_value(self) -> &'static str {
        match self {
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::Full => "bypassPermissions",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::AcceptEdits => write!(f, "accept_edits"),
            PermissionMode::Plan => write!(f, "plan"),
            PermissionMode::Full => write!(f, "full"),
        }
    }
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub instruction: String,
    pub working_dir: PathBuf,
    /// Session to resume. `None` starts fresh unless `continue_most_recent` is set.
    pub session: Option<SessionToken>,
    pub continue_most_recent: bool,
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    pub tier: ModelTier,
    /// Concrete model name resolved from the tier.
    pub model: String,
    pub system_prompt_append: Option<String>,
    pub timeout: Duration,
}

impl AgentRequest {
    pub fn new(
        instruction: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        tier: ModelTier,
        model: impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            working_dir: working_dir.into(),
            session: None,
            continue_most_recent: false,
            allowed_tools: Vec::new(),
            permission_mode: PermissionMode::AcceptEdits,
            tier,
            model: model.into(),
            system_prompt_append: None,
            timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
        }
    }

    /// Continue the previous invocation's conversation.
    ///
    /// With no token from the previous invocation, fall back to the agent's
    /// "continue most recent" mode rather than silently starting fresh.
    pub fn resuming(mut self, session: Option<&SessionToken>) -> Self {
        match session {
            Some(token) => {
                self.session = Some(token.clone());
                self.continue_most_recent = false;
            }
            None => {
                self.session = None;
                self.continue_most_recent = true;
            }
        }
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_permission(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = mode;
        self
    }

    pub fn with_system_prompt(mut self, text: impl Into<String>) -> Self {
        self.system_prompt_append = Some(text.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful invocation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub result: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub session: Option<SessionToken>,
    pub num_turns: u32,
}

/// Failed invocation: process, timeout or parse error.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AgentFailure {
    pub message: String,
    /// Whatever the agent printed before failing.
    pub raw_output: String,
    /// Best-effort token recovered from malformed output.
    pub session_token: Option<SessionToken>,
    /// The invocation hit its time bound rather than failing outright.
    pub timed_out: bool,
}

impl AgentFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raw_output: String::new(),
            session_token: None,
            timed_out: false,
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::new(format!("Agent timed out after {}s", timeout.as_secs()))
        }
    }
}

/// Runs a coding agent. Real implementation: [`ClaudeCliExecutor`].
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AgentRequest {
        AgentRequest::new("do it", "/tmp/ws", ModelTier::Mid, "sonnet")
    }

    #[test]
    fn new_request_starts_fresh() {
        let req = request();
        assert!(req.session.is_none());
        assert!(!req.continue_most_recent);
        assert_eq!(req.permission_mode, PermissionMode::AcceptEdits);
    }

    #[test]
    fn resuming_with_token_sets_session() {
        let token = SessionToken::new("abc");
        let req = request().resuming(Some(&token));
        assert_eq!(req.session, Some(token));
        assert!(!req.continue_most_recent);
    }

    #[test]
    fn resuming_without_token_continues_most_recent() {
        let req = request().resuming(None);
        assert!(req.session.is_none());
        assert!(req.continue_most_recent);
    }

    #[test]
    fn tool_sets_differ_in_write_access() {
        assert!(!PLANNING_TOOLS.contains(&"Write"));
        assert!(!PLANNING_TOOLS.contains(&"Edit"));
        assert!(!REPAIR_TOOLS.contains(&"Write"));
        assert!(REPAIR_TOOLS.contains(&"Edit"));
        assert!(BUILD_TOOLS.contains(&"Write"));
    }

    #[test]
    fn permission_mode_cli_values() {
        assert_eq!(PermissionMode::AcceptEdits.cli_value(), "acceptEdits");
        assert_eq!(PermissionMode::Plan.cli_value(), "plan");
        assert_eq!(PermissionMode::Full.cli_value(), "bypassPermissions");
    }

    #[test]
    fn timeout_failure_is_marked() {
        let failure = AgentFailure::timeout(Duration::from_secs(90));
        assert!(failure.timed_out);
        assert_eq!(failure.message, "Agent timed out after 90s");
        assert!(!AgentFailure::new("boom").timed_out);
    }

    #[test]
    fn session_token_serializes_as_plain_string() {
        let json = serde_json::to_string(&SessionToken::new("s-1")).unwrap();
        assert_eq!(json, "\"s-1\"");
    }
}
