use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AgentExecutor, AgentFailure, AgentRequest, AgentResponse, SessionToken};
use crate::util::{extract_json_object, truncate_output};

static SESSION_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""session_id"\s*:\s*"([^"]+)""#).expect("session id pattern is valid")
});

const MAX_RAW_OUTPUT_CHARS: usize = 20_000;

/// Final result object printed by `claude --print --output-format json`.
#[derive(Debug, Deserialize)]
struct ClaudeResult {
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    num_turns: u32,
}

/// Agent executor backed by the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliExecutor {
    claude_cmd: String,
    skip_permissions: bool,
}

impl ClaudeCliExecutor {
    pub fn new(claude_cmd: impl Into<String>, skip_permissions: bool) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            skip_permissions,
        }
    }

    /// CLI arguments for a request. The instruction itself goes through stdin.
    pub fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--permission-mode".to_string(),
            request.permission_mode.cli_value().to_string(),
        ];

        if let Some(session) = &request.session {
            args.push("--resume".to_string());
            args.push(session.as_str().to_string());
        } else if request.continue_most_recent {
            args.push("--continue".to_string());
        }

        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }

        if let Some(system) = &request.system_prompt_append {
            args.push("--append-system-prompt".to_string());
            args.push(system.clone());
        }

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args
    }
}

#[async_trait]
impl AgentExecutor for ClaudeCliExecutor {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentFailure> {
        let args = self.build_args(&request);
        debug!(
            model = %request.model,
            tier = %request.tier,
            permission = %request.permission_mode,
            resume = request.session.is_some(),
            prompt_chars = request.instruction.len(),
            "Invoking agent"
        );

        let mut child = Command::new(&self.claude_cmd)
            .args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentFailure::new(format!("Failed to spawn {}: {}", self.claude_cmd, e))
            })?;

        // The prompt write is inside the time bound: an agent that never drains
        // stdin must not hang the run.
        let stdin = child.stdin.take();
        let prompt = request.instruction.as_bytes();
        let run = async {
            if let Some(mut stdin) = stdin {
                stdin
                    .write_all(prompt)
                    .await
                    .map_err(|e| AgentFailure::new(format!("Failed to write prompt: {}", e)))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|e| AgentFailure::new(format!("Failed to close stdin: {}", e)))?;
            }
            child.wait_with_output().await.map_err(|e| {
                AgentFailure::new(format!("Failed to wait for agent process: {}", e))
            })
        };

        let output = match tokio::time::timeout(request.timeout, run).await {
            Err(_) => {
                warn!(timeout_secs = request.timeout.as_secs(), "Agent invocation timed out");
                return Err(AgentFailure::timeout(request.timeout));
            }
            Ok(result) => result?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut raw = stdout.clone();
            raw.push_str(&stderr);
            return Err(AgentFailure {
                message: format!(
                    "Agent process exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
                session_token: recover_session_token(&raw),
                raw_output: truncate_output(&raw, MAX_RAW_OUTPUT_CHARS),
                timed_out: false,
            });
        }

        let response = parse_result(&stdout)?;
        info!(
            cost_usd = response.cost_usd,
            duration_ms = response.duration_ms,
            num_turns = response.num_turns,
            "Agent invocation completed"
        );
        Ok(response)
    }
}

/// Parse the CLI's JSON result into a response, or a failure carrying the raw output.
pub fn parse_result(stdout: &str) -> Result<AgentResponse, AgentFailure> {
    let parsed = serde_json::from_str::<ClaudeResult>(stdout.trim()).or_else(|first| {
        extract_json_object(stdout)
            .ok_or(first)
            .and_then(|json| serde_json::from_str::<ClaudeResult>(&json))
    });

    let result = match parsed {
        Ok(result) => result,
        Err(e) => {
            return Err(AgentFailure {
                message: format!("Failed to parse agent output: {}", e),
                raw_output: truncate_output(stdout, MAX_RAW_OUTPUT_CHARS),
                session_token: recover_session_token(stdout),
                timed_out: false,
            });
        }
    };

    let session = result.session_id.map(SessionToken::new);

    if result.is_error {
        return Err(AgentFailure {
            message: format!(
                "Agent reported an error ({}): {}",
                result.subtype.as_deref().unwrap_or("unknown"),
                result.result.as_deref().unwrap_or("no details")
            ),
            raw_output: truncate_output(stdout, MAX_RAW_OUTPUT_CHARS),
            session_token: session,
            timed_out: false,
        });
    }

    Ok(AgentResponse {
        result: result.result.unwrap_or_default(),
        cost_usd: result.total_cost_usd,
        duration_ms: result.duration_ms,
        session,
        num_turns: result.num_turns,
    })
}

/// Pull a session id out of output that may not be valid JSON.
pub fn recover_session_token(raw: &str) -> Option<SessionToken> {
    SESSION_ID_REGEX
        .captures_iter(raw)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| SessionToken::new(m.as_str()))
}
