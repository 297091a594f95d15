//! Audit ledger viewer: `kiln audit`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use kiln::audit::{AuditLedger, LedgerRecord, ValidationStatus, read_ledger};

/// Print the ledger of a workspace directory, or of a ledger file given directly.
pub fn cmd_audit(target: &Path, json: bool) -> Result<()> {
    if !target.exists() {
        anyhow::bail!("No such workspace: {}", target.display());
    }
    let (ledger_path, records) = if target.is_dir() {
        let ledger = AuditLedger::new(target);
        let records = ledger.entries()?;
        (ledger.path().to_path_buf(), records)
    } else {
        (target.to_path_buf(), read_ledger(target)?)
    };

    if json {
        for record in &records {
            let line = serde_json::to_string(record).context("Failed to serialize record")?;
            println!("{}", line);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No audit entries in {}", ledger_path.display());
        return Ok(());
    }

    println!();
    println!("Audit trace: {}", ledger_path.display());
    println!();
    for record in &records {
        println!("{}", format_record(record));
    }

    let total: f64 = records.iter().map(|r| r.entry.cost_usd).sum();
    println!();
    println!("  {} entries, total cost ${:.4}", records.len(), total);
    println!();
    Ok(())
}

fn format_record(record: &LedgerRecord) -> String {
    let entry = &record.entry;
    let validation = match entry.validation {
        ValidationStatus::Pass => style("pass").green().to_string(),
        ValidationStatus::Fail => style("fail").red().to_string(),
        ValidationStatus::NotApplicable => style("-").dim().to_string(),
    };
    let mut line = format!(
        "  {}  {:<24} {:<5} ${:.4}",
        record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
        entry.step.to_string(),
        validation,
        entry.cost_usd
    );
    if let Some(tier) = entry.model_tier {
        line.push_str(&format!("  tier={}", tier));
    }
    if let Some(category) = entry.failure_category {
        line.push_str(&format!("  category={}", category));
    }
    if let Some(session) = &entry.session_token {
        line.push_str(&format!("  session={}", session));
    }
    if let Some(detail) = &entry.detail {
        line.push_str(&format!("  {}", style(detail).dim()));
    }
    line
}
