use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about = "Self-correcting package build orchestrator")]
pub struct Cli {
    /// Path to kiln.toml. Defaults to ./kiln.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build one package: scaffold, implement, then verify and repair
    Build {
        /// Package specification file
        #[arg(long)]
        spec: PathBuf,

        /// Requirements document written into the workspace
        #[arg(long)]
        requirements: PathBuf,

        /// Run a read-only architecture planning step first
        #[arg(long)]
        plan: bool,

        /// Push a branch and open a pull request when the build succeeds
        #[arg(long)]
        publish: bool,

        /// Create the workspace under this directory instead of the configured root
        #[arg(long)]
        base_path: Option<PathBuf>,

        /// Model for the low tier
        #[arg(long)]
        model_low: Option<String>,

        /// Model for the mid tier
        #[arg(long)]
        model_mid: Option<String>,

        /// Model for the high tier
        #[arg(long)]
        model_high: Option<String>,
    },
    /// Run independent sub-tasks on isolated branches and merge them
    Parallel {
        /// Sub-task list (.json, .yaml or .yml)
        #[arg(long)]
        tasks: PathBuf,

        /// Package specification file
        #[arg(long)]
        spec: PathBuf,

        /// Requirements document written into the workspace
        #[arg(long)]
        requirements: PathBuf,

        /// Create the workspace under this directory instead of the configured root
        #[arg(long)]
        base_path: Option<PathBuf>,

        /// Copy the scaffold template into the workspace before fan-out
        #[arg(long)]
        seed_scaffolding: bool,
    },
    /// Print the audit ledger of a workspace
    Audit {
        /// Workspace directory
        workspace: PathBuf,

        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },
    /// View or create configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default kiln.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = kiln::logging::init(cli.verbose, cli.log_dir.as_deref())?;

    match &cli.command {
        Commands::Build {
            spec,
            requirements,
            plan,
            publish,
            base_path,
            model_low,
            model_mid,
            model_high,
        } => {
            let args = cmd::BuildArgs {
                spec,
                requirements,
                plan: *plan,
                publish: *publish,
                base_path: base_path.clone(),
                overrides: kiln::policy::ModelOverrides {
                    low: model_low.clone(),
                    mid: model_mid.clone(),
                    high: model_high.clone(),
                },
            };
            cmd::cmd_build(&cli, args).await?;
        }
        Commands::Parallel {
            tasks,
            spec,
            requirements,
            base_path,
            seed_scaffolding,
        } => {
            cmd::cmd_parallel(
                &cli,
                tasks,
                spec,
                requirements,
                base_path.clone(),
                *seed_scaffolding,
            )
            .await?;
        }
        Commands::Audit { workspace, json } => cmd::cmd_audit(workspace, *json)?,
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
