//! Single-package build command: `kiln build`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use kiln::BuildError;
use kiln::config::KilnConfig;
use kiln::orchestrator::{BuildOrchestrator, BuildRequest, BuildResult};
use kiln::policy::ModelOverrides;
use kiln::util::slugify;

use super::super::Cli;

pub struct BuildArgs<'a> {
    pub spec: &'a Path,
    pub requirements: &'a Path,
    pub plan: bool,
    pub publish: bool,
    pub base_path: Option<PathBuf>,
    pub overrides: ModelOverrides,
}

/// Spec and requirements read from disk, plus the derived package name.
pub(crate) struct PackageInput {
    pub name: String,
    pub spec: String,
    pub requirements: String,
}

impl PackageInput {
    pub fn read(spec: &Path, requirements: &Path) -> Result<Self> {
        let spec_text = std::fs::read_to_string(spec)
            .with_context(|| format!("Failed to read spec file: {}", spec.display()))?;
        let requirements_text = std::fs::read_to_string(requirements).with_context(|| {
            format!("Failed to read requirements file: {}", requirements.display())
        })?;
        Ok(Self {
            name: package_name(spec),
            spec: spec_text,
            requirements: requirements_text,
        })
    }
}

/// Package name from the spec file stem, e.g. `specs/Date Utils.md` -> `date-utils`.
pub(crate) fn package_name(spec: &Path) -> String {
    let stem = spec
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let slug = slugify(&stem, 40);
    if slug.is_empty() {
        "package".to_string()
    } else {
        slug
    }
}

pub async fn cmd_build(cli: &Cli, args: BuildArgs<'_>) -> Result<()> {
    let config = KilnConfig::resolve(cli.config.as_deref())?;
    let input = PackageInput::read(args.spec, args.requirements)?;

    let publish = args.publish && confirm_publish(cli.yes);

    let request = BuildRequest {
        package_name: input.name,
        package_spec: input.spec,
        requirements: input.requirements,
        enable_planning: args.plan,
        model_overrides: args.overrides,
        publish,
        base_path: args.base_path,
    };

    let orchestrator = BuildOrchestrator::new(
        config.executor(),
        config.verifier(),
        config.orchestrator_settings(),
    )
    .with_publisher(config.publisher());

    println!();
    println!(
        "{} Building {}",
        style("▶").cyan().bold(),
        style(&request.package_name).bold()
    );

    match orchestrator.run(&request).await {
        Ok(result) => {
            print_summary(&result);
            Ok(())
        }
        Err(err) => {
            print_failure(&err);
            Err(err.into())
        }
    }
}

/// Publishing pushes to a remote, so ask first when someone is at the terminal.
fn confirm_publish(assume_yes: bool) -> bool {
    use dialoguer::Confirm;

    if assume_yes || !console::Term::stdout().is_term() {
        return true;
    }
    let confirmed = Confirm::new()
        .with_prompt("Push a branch and open a pull request when the build succeeds?")
        .default(false)
        .interact()
        .unwrap_or(false);
    if !confirmed {
        println!("Publishing disabled for this run");
    }
    confirmed
}

fn print_summary(result: &BuildResult) {
    println!();
    println!("{}", style("Build succeeded").green().bold());
    println!("  Workspace:  {}", result.workspace.display());
    println!("  Run:        {}", style(result.run_id).dim());
    println!("  Cost:       ${:.4}", result.total_cost_usd);
    println!(
        "  Repairs:    {} ({} verification passes)",
        result.repair_attempts, result.verification_passes
    );
    if let Some(session) = &result.session {
        println!("  Session:    {}", style(session).dim());
    }

    if let Some(outcome) = &result.publish {
        println!("  Branch:     {}", outcome.branch);
        if outcome.is_complete() {
            let url = outcome.pr_url.as_deref().unwrap_or_default();
            println!("  PR:         {}", style(url).cyan());
        } else {
            println!(
                "  PR:         {} at {}: {}",
                style("not created").yellow(),
                outcome.failed_step.as_deref().unwrap_or("create_pull_request"),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!();
}

fn print_failure(err: &BuildError) {
    eprintln!();
    eprintln!("{}", style("Build failed").red().bold());
    if let Some(workspace) = err.workspace() {
        eprintln!("  Workspace:  {}", workspace.display());
    }
    if let BuildError::RepairBudgetExhausted { audit_path, .. } = err {
        eprintln!("  Audit:      {}", audit_path.display());
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_name_from_stem() {
        assert_eq!(package_name(Path::new("specs/date-utils.md")), "date-utils");
        assert_eq!(package_name(Path::new("Date Utils.md")), "date-utils");
        assert_eq!(package_name(Path::new("...")), "package");
    }

    #[test]
    fn test_read_inputs() {
        let dir = TempDir::new().unwrap();
        let spec = dir.path().join("left-pad.md");
        let requirements = dir.path().join("req.md");
        std::fs::write(&spec, "Pad strings on the left.").unwrap();
        std::fs::write(&requirements, "Use TypeScript.").unwrap();

        let input = PackageInput::read(&spec, &requirements).unwrap();
        assert_eq!(input.name, "left-pad");
        assert_eq!(input.spec, "Pad strings on the left.");
        assert_eq!(input.requirements, "Use TypeScript.");
    }

    #[test]
    fn test_read_inputs_missing_spec() {
        let dir = TempDir::new().unwrap();
        let err = PackageInput::read(&dir.path().join("nope.md"), &dir.path().join("req.md"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to read spec file"));
    }

    #[test]
    fn test_confirm_publish_assume_yes() {
        assert!(confirm_publish(true));
    }
}
