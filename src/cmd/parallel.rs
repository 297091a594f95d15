//! Parallel sub-task build command: `kiln parallel`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use kiln::config::KilnConfig;
use kiln::orchestrator::{ParallelBuildRequest, ParallelBuildResult, ParallelOrchestrator, SubTask};

use super::super::Cli;
use super::build::PackageInput;

/// Parse a task list. `.yaml`/`.yml` files are read as YAML, everything else as JSON.
pub(crate) fn load_tasks(path: &Path) -> Result<Vec<SubTask>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file: {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse tasks file: {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tasks file: {}", path.display()))
    }
}

pub async fn cmd_parallel(
    cli: &Cli,
    tasks: &Path,
    spec: &Path,
    requirements: &Path,
    base_path: Option<PathBuf>,
    seed_scaffolding: bool,
) -> Result<()> {
    let config = KilnConfig::resolve(cli.config.as_deref())?;
    let tasks = load_tasks(tasks)?;
    let input = PackageInput::read(spec, requirements)?;

    let request = ParallelBuildRequest {
        package_name: input.name,
        package_spec: input.spec,
        requirements: input.requirements,
        tasks,
        seed_scaffolding,
        model_overrides: Default::default(),
        base_path,
    };

    let orchestrator = ParallelOrchestrator::new(
        config.executor(),
        config.verifier(),
        config.orchestrator_settings(),
    );

    println!();
    println!(
        "{} Running {} sub-tasks for {}",
        style("▶").cyan().bold(),
        request.tasks.len(),
        style(&request.package_name).bold()
    );

    let result = orchestrator.run(&request).await?;
    print_summary(&result);

    if !result.verified {
        anyhow::bail!(
            "Merged workspace failed compliance: {}",
            result.workspace.display()
        );
    }
    Ok(())
}

fn print_summary(result: &ParallelBuildResult) {
    println!();
    for task in &result.subtasks {
        let marker = if !task.success {
            style("✗").red()
        } else if result.merge_conflicts.contains(&task.branch) {
            style("!").yellow()
        } else {
            style("✓").green()
        };
        print!("  {} {:<30} ${:.4}", marker, task.branch, task.cost_usd);
        if let Some(error) = &task.error {
            print!("  {}", style(error).dim());
        }
        println!();
    }
    println!();
    println!("  Workspace:  {}", result.workspace.display());
    println!("  Cost:       ${:.4}", result.total_cost_usd);
    println!("  Merged:     {}", result.merged.join(", "));
    if !result.merge_conflicts.is_empty() {
        println!(
            "  Conflicts:  {}",
            style(result.merge_conflicts.join(", ")).yellow()
        );
    }
    if !result.failed_tasks.is_empty() {
        println!("  Failed:     {}", style(result.failed_tasks.join(", ")).red());
    }
    let verdict = if result.verified {
        style("passed").green().bold()
    } else {
        style("failed").red().bold()
    };
    println!("  Compliance: {}", verdict);
    println!();
}
