//! Scripted collaborators for orchestrator tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::agent::{AgentExecutor, AgentFailure, AgentRequest, AgentResponse, SessionToken};
use crate::compliance::{ComplianceFailure, ComplianceResult, ComplianceVerifier, FailureCategory};

pub(crate) type Scripted = Result<AgentResponse, AgentFailure>;

pub(crate) fn reply(cost_usd: f64, session: Option<&str>) -> Scripted {
    Ok(AgentResponse {
        result: "done".to_string(),
        cost_usd,
        duration_ms: 1_000,
        session: session.map(SessionToken::new),
        num_turns: 3,
    })
}

pub(crate) fn fail(message: &str) -> Scripted {
    Err(AgentFailure::new(message))
}

pub(crate) fn time_out() -> Scripted {
    Err(AgentFailure::timeout(std::time::Duration::from_secs(1800)))
}

pub(crate) fn passing() -> ComplianceResult {
    ComplianceResult::passed(
        "$ npm install\n$ npm run build\n$ npm run lint\n$ npm test\n",
        vec![
            "npm install".into(),
            "npm run build".into(),
            "npm run lint".into(),
            "npm test".into(),
        ],
    )
}

pub(crate) fn failing(category: FailureCategory, output: &str) -> ComplianceResult {
    ComplianceResult::failed(
        format!("$ check\n{}\n", output),
        vec!["check".into()],
        ComplianceFailure {
            command: "check".into(),
            category,
            output: output.to_string(),
        },
    )
}

/// Replays canned responses in order and records every request.
pub(crate) struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentFailure> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| fail("script exhausted"))
    }
}

/// Returns canned compliance results; the last one repeats once the script runs out.
pub(crate) struct ScriptedVerifier {
    results: Mutex<VecDeque<ComplianceResult>>,
    last: Mutex<Option<ComplianceResult>>,
    broken: Option<String>,
    calls: Mutex<u32>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<ComplianceResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            last: Mutex::new(None),
            broken: None,
            calls: Mutex::new(0),
        }
    }

    /// A verifier that cannot run at all.
    pub fn broken(message: &str) -> Self {
        Self {
            broken: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ComplianceVerifier for ScriptedVerifier {
    async fn verify(&self, _working_dir: &Path) -> Result<ComplianceResult> {
        *self.calls.lock().unwrap() += 1;
        if let Some(message) = &self.broken {
            anyhow::bail!("{}", message);
        }
        let next = self.results.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(result) = next {
            *last = Some(result);
        }
        Ok(last.clone().unwrap_or_else(passing))
    }
}
