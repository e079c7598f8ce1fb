//! # sdm-cli
//!
//! Command-line interface for the software delivery machine.
//!
//! - `sdm plan --push FILE` — show the goal plan a push would get, and why
//! - `sdm push --push FILE` — plan a push and run its feature reactions
//! - `sdm ideal show/set` — inspect or override a feature's ideal
//! - `sdm deploy freeze/unfreeze/enable/disable/status` — deployment control
//! - `sdm features` — list features and their registrations
//! - `sdm inspect OWNER REPO` — fingerprint one checkout
//! - `sdm accept --feature NAME --owner OWNER --repo REPO` — apply an ideal

mod commands;
mod config;
mod machine;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::SdmConfig;
use machine::Sdm;

/// Software delivery machine CLI — plan pushes and converge features.
#[derive(Parser)]
#[command(name = "sdm", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the goal plan for a push without acting on it.
    Plan {
        /// Push event as JSON.
        #[arg(long)]
        push: PathBuf,
        /// Print the resolution trace as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Plan a push and run its push-impact and fingerprint reactions.
    Push {
        /// Push event as JSON.
        #[arg(long)]
        push: PathBuf,
    },
    /// Inspect or override feature ideals.
    Ideal {
        #[command(subcommand)]
        command: commands::ideal::IdealCommands,
    },
    /// Freeze deployments or enable them per repository.
    Deploy {
        #[command(subcommand)]
        command: commands::deploy::DeployCommands,
    },
    /// List features and what they register.
    Features,
    /// Fingerprint every feature in one repository.
    Inspect {
        owner: String,
        repo: String,
    },
    /// Bring a repository to a feature's ideal.
    Accept {
        #[arg(long)]
        feature: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("sdm=info".parse()?)
        .add_directive("sdm_goal=info".parse()?)
        .add_directive("sdm_feature=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = SdmConfig::for_project(&project_root)?;
    let sdm = Sdm::assemble(config)?;

    match &cli.command {
        Commands::Plan { push, json } => commands::push::plan(&sdm, push, *json),
        Commands::Push { push } => commands::push::push(&sdm, push),
        Commands::Ideal { command } => commands::ideal::execute(command, &sdm),
        Commands::Deploy { command } => commands::deploy::execute(command, &sdm),
        Commands::Features => commands::features::list(&sdm),
        Commands::Inspect { owner, repo } => commands::features::print_inspection(&sdm, owner, repo),
        Commands::Accept {
            feature,
            owner,
            repo,
        } => commands::features::accept(&sdm, feature, owner, repo).map(|_| ()),
    }
}
