use super::{AuditEntry, AuditSink};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the ledger inside a workspace.
pub const AUDIT_FILE_NAME: &str = "audit_trace.jsonl";

/// A persisted ledger line: the entry plus the write-time timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub recorded_at: DateTime<Utc>,
}

/// Newline-delimited JSON ledger living in a workspace.
///
/// Every append opens the file in append mode and writes exactly one line;
/// existing lines are never touched.
#[derive(Debug, Clone)]
pub struct AuditLedger {
    path: PathBuf,
}

impl AuditLedger {
    pub fn new(workspace: &Path) -> Self {
        Self {
            path: workspace.join(AUDIT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<LedgerRecord>> {
        read_ledger(&self.path)
    }
}

impl AuditSink for AuditLedger {
    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let record = LedgerRecord {
            entry: entry.clone(),
            recorded_at: Utc::now(),
        };
        let mut line =
            serde_json::to_string(&record).context("Failed to serialize audit entry")?;
        line.push('\n');

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit ledger {}", self.path.display()))?
            .write_all(line.as_bytes())
            .context("Failed to append audit entry")?;

        Ok(())
    }
}

/// Read every record of a ledger file. A missing file is an empty ledger.
pub fn read_ledger(path: &Path) -> Result<Vec<LedgerRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read audit ledger {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Failed to parse audit ledger line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SessionToken;
    use crate::audit::{StepName, ValidationStatus};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn setup_ledger() -> (AuditLedger, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let ledger = AuditLedger::new(dir.path());
        (ledger, dir)
    }

    #[test]
    fn missing_ledger_reads_as_empty() {
        let (ledger, _dir) = setup_ledger();
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn appends_one_json_line_per_entry() {
        let (ledger, _dir) = setup_ledger();
        let run_id = Uuid::new_v4();
        ledger
            .append(&AuditEntry::new(run_id, StepName::WorkspaceSetup))
            .unwrap();
        ledger
            .append(
                &AuditEntry::new(run_id, StepName::Scaffold)
                    .with_cost(0.5)
                    .with_session(Some(SessionToken::new("sess-1"))),
            )
            .unwrap();

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(value["step"], "scaffold");
        assert_eq!(value["session_token"], "sess-1");
        assert!(
            value["recorded_at"].as_str().is_some(),
            "recorded_at must be written at append time"
        );
    }

    #[test]
    fn appends_never_rewrite_existing_lines() {
        let (ledger, _dir) = setup_ledger();
        let run_id = Uuid::new_v4();
        ledger
            .append(&AuditEntry::new(run_id, StepName::WorkspaceSetup))
            .unwrap();
        let first = std::fs::read_to_string(ledger.path()).unwrap();

        ledger
            .append(&AuditEntry::new(run_id, StepName::Implement))
            .unwrap();
        let second = std::fs::read_to_string(ledger.path()).unwrap();
        assert!(second.starts_with(&first));
    }

    #[test]
    fn entries_round_trip_in_order() {
        let (ledger, _dir) = setup_ledger();
        let run_id = Uuid::new_v4();
        for step in [
            StepName::WorkspaceSetup,
            StepName::Scaffold,
            StepName::Implement,
            StepName::ValidationInitial,
        ] {
            ledger.append(&AuditEntry::new(run_id, step)).unwrap();
        }

        let records = ledger.entries().unwrap();
        let steps: Vec<String> = records.iter().map(|r| r.entry.step.to_string()).collect();
        assert_eq!(
            steps,
            vec!["workspace_setup", "scaffold", "implement", "validation_initial"]
        );
        assert!(
            records
                .iter()
                .all(|r| r.entry.validation == ValidationStatus::NotApplicable)
        );
        assert!(
            records
                .windows(2)
                .all(|w| w[0].recorded_at <= w[1].recorded_at)
        );
    }

    #[test]
    fn corrupt_line_is_reported_with_line_number() {
        let (ledger, _dir) = setup_ledger();
        std::fs::write(ledger.path(), "{not json}\n").unwrap();
        let err = ledger.entries().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
